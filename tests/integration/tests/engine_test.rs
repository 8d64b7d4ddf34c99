//! End-to-end engine tests
//!
//! These drive the full stack — engine, worker threads, clip, container,
//! codecs — against in-memory synthesized streams.

use anyhow::Result;
use reelplay::{EngineConfig, MemorySource, OpenOptions, OutputMode, VideoEngine};
use reelplay_integration_tests::{init_logging, synth_stream, SynthSpec};
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine_with_workers(count: usize) -> Result<VideoEngine> {
    init_logging();
    let mut config = EngineConfig::default();
    config.workers.thread_count = count;
    Ok(VideoEngine::with_config(config)?)
}

#[test]
#[serial]
fn ten_second_clip_with_three_racing_workers() -> Result<()> {
    // a 10-second, 30 fps clip with a 4-frame precache, decoded by
    // three workers while the driver ticks 40 times at 0.1s
    let engine = engine_with_workers(3)?;
    let data = synth_stream(&SynthSpec::default()); // 300 frames at 30 fps
    let clip = engine.create_clip(
        Box::new(MemorySource::with_label(data, "ten-second-clip")),
        OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        },
    )?;

    assert_eq!(clip.frame_count(), 300);
    assert!((clip.duration().unwrap() - 10.0).abs() < 1e-6);

    let frame_len = OutputMode::Rgb24.buffer_len(clip.stride(), clip.height());
    let mut consumed = 0u64;
    let mut last_time = f64::NEG_INFINITY;

    for _ in 0..40 {
        engine.tick(0.1);
        // give the workers a slice of real time to race in
        std::thread::sleep(Duration::from_millis(5));

        while let Some(frame) = clip.get_next_frame() {
            // a frame handed to the consumer is always fully decoded
            assert_eq!(frame.data().len(), frame_len);
            // and display times never run backwards within an iteration
            assert!(
                frame.display_time() >= last_time,
                "display time regressed: {} after {}",
                frame.display_time(),
                last_time
            );
            last_time = frame.display_time();
            drop(frame);
            clip.pop_frame();
            consumed += 1;
        }
    }

    // four seconds of playback elapsed; every elapsed frame was either
    // displayed or dropped, and nothing was double-counted
    let accounted = clip.displayed_frame_count() + clip.dropped_frame_count();
    assert!(consumed > 0, "no frames were consumed");
    assert!(
        accounted >= consumed,
        "telemetry lost frames: accounted {} < consumed {}",
        accounted,
        consumed
    );
    assert!(
        accounted <= 2 * 130,
        "telemetry overcounted: {} for ~120 elapsed frames",
        accounted
    );

    engine.destroy_clip(&clip)?;
    assert_eq!(engine.clip_count(), 0);
    Ok(())
}

#[test]
#[serial]
fn seek_lands_within_one_frame_interval_twice() -> Result<()> {
    let engine = engine_with_workers(1)?;
    let data = synth_stream(&SynthSpec::default());
    let clip = engine.create_clip(
        Box::new(MemorySource::with_label(data, "seek-clip")),
        OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        },
    )?;

    let interval = 1.0 / clip.fps();
    for attempt in 0..2 {
        clip.seek(5.0);

        // wait for a worker to run the seek and decode the first frame
        let deadline = Instant::now() + Duration::from_secs(5);
        let frame_time = loop {
            engine.tick(0.0);
            if let Some(frame) = clip.get_next_frame() {
                break frame.display_time();
            }
            assert!(Instant::now() < deadline, "no frame after seek");
            std::thread::sleep(Duration::from_millis(2));
        };

        assert!(
            (frame_time - 5.0).abs() <= interval + 1e-9,
            "attempt {}: landed at {} for target 5.0",
            attempt,
            frame_time
        );
        clip.pop_frame();
    }

    engine.destroy_clip(&clip)?;
    Ok(())
}

#[test]
#[serial]
fn restart_round_trip_through_engine() -> Result<()> {
    let engine = engine_with_workers(2)?;
    let data = synth_stream(&SynthSpec {
        frames: 30,
        ..Default::default()
    });
    let clip = engine.create_clip(
        Box::new(MemorySource::with_label(data, "restart-clip")),
        OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        },
    )?;

    // play the one-second clip out
    let deadline = Instant::now() + Duration::from_secs(10);
    while !clip.is_done() {
        engine.tick(0.05);
        while let Some(frame) = clip.get_next_frame() {
            drop(frame);
            clip.pop_frame();
        }
        assert!(Instant::now() < deadline, "clip never finished");
        std::thread::sleep(Duration::from_millis(2));
    }

    clip.restart();
    assert_eq!(clip.position(), 0.0);
    assert_eq!(clip.ready_frame_count(), 0);
    assert!(!clip.end_of_stream());

    // playback resumes from the top
    let deadline = Instant::now() + Duration::from_secs(5);
    let first = loop {
        engine.tick(0.05);
        if let Some(frame) = clip.get_next_frame() {
            break frame.frame_number();
        }
        assert!(Instant::now() < deadline, "no frame after restart");
        std::thread::sleep(Duration::from_millis(2));
    };
    assert!(first < 3, "restart did not rewind to the start, got frame {}", first);

    engine.destroy_clip(&clip)?;
    Ok(())
}

#[test]
#[serial]
fn destroy_clip_waits_out_inflight_decode() -> Result<()> {
    let engine = engine_with_workers(4)?;
    // several clips competing for workers
    let clips: Vec<_> = (0..3)
        .map(|i| {
            let data = synth_stream(&SynthSpec::default());
            engine.create_clip(
                Box::new(MemorySource::with_label(data, format!("clip-{}", i))),
                OpenOptions {
                    precached_frames: Some(4),
                    ..Default::default()
                },
            )
        })
        .collect::<reelplay::Result<_>>()?;

    for _ in 0..10 {
        engine.tick(0.05);
        std::thread::sleep(Duration::from_millis(2));
    }

    // destroying mid-flight must neither deadlock nor tear down a clip
    // a worker still holds
    for clip in &clips {
        engine.destroy_clip(clip)?;
    }
    assert_eq!(engine.clip_count(), 0);

    // destroyed clips are safe to drop even with the engine running
    drop(clips);
    engine.tick(0.05);
    Ok(())
}

#[test]
#[serial]
fn worker_pool_resize_during_playback() -> Result<()> {
    let engine = engine_with_workers(1)?;
    let data = synth_stream(&SynthSpec::default());
    let clip = engine.create_clip(
        Box::new(MemorySource::with_label(data, "resize-clip")),
        OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        },
    )?;

    for _ in 0..5 {
        engine.tick(0.05);
        std::thread::sleep(Duration::from_millis(2));
    }

    engine.set_worker_count(3)?;
    assert_eq!(engine.worker_count(), 3);

    // decoding continues with the new pool
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        engine.tick(0.05);
        if clip.get_next_frame().is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "no frames after pool resize");
        std::thread::sleep(Duration::from_millis(2));
    }

    engine.destroy_clip(&clip)?;
    Ok(())
}

#[test]
#[serial]
fn paused_clips_yield_to_playing_ones() -> Result<()> {
    let engine = engine_with_workers(1)?;
    let make = |label: &str| {
        engine.create_clip(
            Box::new(MemorySource::with_label(
                synth_stream(&SynthSpec::default()),
                label,
            )),
            OpenOptions {
                precached_frames: Some(8),
                ..Default::default()
            },
        )
    };
    let paused = make("paused-clip")?;
    let playing = make("playing-clip")?;
    paused.pause();

    // drain the playing clip continuously so it keeps needing service
    for _ in 0..30 {
        engine.tick(1.0 / 30.0);
        while let Some(frame) = playing.get_next_frame() {
            drop(frame);
            playing.pop_frame();
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    assert!(
        playing.displayed_frame_count() > 0,
        "the active clip made no progress"
    );

    engine.destroy_clip(&paused)?;
    engine.destroy_clip(&playing)?;
    Ok(())
}

#[test]
#[serial]
fn audio_reaches_sink_during_playback() -> Result<()> {
    use reelplay_integration_tests::CountingSinkFactory;

    let engine = engine_with_workers(2)?;
    let (factory, samples) = CountingSinkFactory::new();
    engine.set_audio_sink_factory(Some(Arc::new(factory)));

    let data = synth_stream(&SynthSpec {
        frames: 90,
        with_audio: true,
        ..Default::default()
    });
    let clip = engine.create_clip(
        Box::new(MemorySource::with_label(data, "audio-clip")),
        OpenOptions {
            precached_frames: Some(4),
            ..Default::default()
        },
    )?;
    assert!(clip.has_audio());

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        engine.tick(1.0 / 30.0);
        while let Some(frame) = clip.get_next_frame() {
            drop(frame);
            clip.pop_frame();
        }
        if *samples.lock().unwrap() > 0 {
            break;
        }
        assert!(Instant::now() < deadline, "no audio reached the sink");
        std::thread::sleep(Duration::from_millis(2));
    }

    engine.destroy_clip(&clip)?;
    Ok(())
}
