//! Video engine: clip registry, work scheduling, and the worker pool
//!
//! The engine is an explicitly constructed context object owning every
//! open clip and the pool of decode workers. The host drives it from a
//! single update thread via [`tick`](VideoEngine::tick); workers pull
//! decode work through [`EngineShared::request_work`], which hands out
//! the non-busy clip with the lowest priority index. Clips are only
//! ever serviced by one worker at a time, and destruction waits for the
//! in-flight decode to finish.

mod worker;

use crate::audio::AudioSinkFactory;
use crate::clip::{OpenOptions, VideoClip};
use crate::source::DataSource;
use crate::utils::config::EngineConfig;
use crate::utils::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// State shared between the engine handle and its worker threads
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    clips: Mutex<Vec<Arc<VideoClip>>>,
    pub(crate) wake_rx: Receiver<()>,
    wake_tx: Sender<()>,
    audio_factory: RwLock<Option<Arc<dyn AudioSinkFactory>>>,
}

impl EngineShared {
    /// Pick the clip most in need of decoding and assign it to the
    /// calling worker
    ///
    /// Scans non-busy clips under the registry lock, skipping clips a
    /// worker could do nothing for (fully buffered, or at end-of-stream
    /// with no pending seek), and selects the lowest priority index.
    pub(crate) fn request_work(&self, worker: usize) -> Option<Arc<VideoClip>> {
        let clips = self.clips.lock();
        let candidate = clips
            .iter()
            .filter(|clip| !clip.is_busy() && clip.wants_work())
            .min_by(|a, b| {
                a.priority_index()
                    .partial_cmp(&b.priority_index())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
        if candidate.try_assign(worker) {
            Some(Arc::clone(candidate))
        } else {
            None
        }
    }

    /// Nudge one idle worker; never blocks
    fn wake_workers(&self) {
        let _ = self.wake_tx.try_send(());
    }
}

struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

/// Owner of all open clips and the decode thread pool
pub struct VideoEngine {
    shared: Arc<EngineShared>,
    pool: Mutex<WorkerPool>,
}

impl VideoEngine {
    /// Create an engine with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine, validating the configuration and spawning the
    /// worker pool
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let thread_count = config.workers.thread_count;
        // a small wake buffer: a missed send only delays a worker by
        // one timeout
        let (wake_tx, wake_rx) = bounded(64);
        let shared = Arc::new(EngineShared {
            config,
            clips: Mutex::new(Vec::new()),
            wake_rx,
            wake_tx,
            audio_factory: RwLock::new(None),
        });
        let pool = Self::spawn_pool(&shared, thread_count);
        info!("video engine started with {} worker threads", thread_count);
        Ok(Self {
            shared,
            pool: Mutex::new(pool),
        })
    }

    fn spawn_pool(shared: &Arc<EngineShared>, count: usize) -> WorkerPool {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = (0..count)
            .map(|id| {
                let shared = Arc::clone(shared);
                let shutdown = Arc::clone(&shutdown);
                std::thread::Builder::new()
                    .name(format!("reelplay-worker-{}", id))
                    .spawn(move || worker::worker_loop(id, shared, shutdown))
                    .expect("spawning decode worker")
            })
            .collect();
        WorkerPool { handles, shutdown }
    }

    fn teardown_pool(pool: &mut WorkerPool) {
        pool.shutdown.store(true, Ordering::Release);
        for handle in pool.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Register a factory that attaches an audio sink to every clip
    /// opened with an audio stream
    pub fn set_audio_sink_factory(&self, factory: Option<Arc<dyn AudioSinkFactory>>) {
        *self.shared.audio_factory.write() = factory;
    }

    /// Open a stream and register the clip for decoding
    ///
    /// Fails without registering anything when the source cannot be
    /// read or its headers are missing or corrupt.
    pub fn create_clip(
        &self,
        source: Box<dyn DataSource>,
        options: OpenOptions,
    ) -> Result<Arc<VideoClip>> {
        let factory = self.shared.audio_factory.read().clone();
        let clip = VideoClip::open(
            source,
            options,
            &self.shared.config,
            factory.as_deref(),
        )?;
        let clip = Arc::new(clip);
        self.shared.clips.lock().push(Arc::clone(&clip));
        debug!("{}: clip registered", clip.name());
        self.shared.wake_workers();
        Ok(clip)
    }

    /// Unregister a clip and wait for any in-flight decode on it to
    /// finish
    ///
    /// The clip is never destroyed mid-decode; after this returns no
    /// worker references it.
    pub fn destroy_clip(&self, clip: &Arc<VideoClip>) -> Result<()> {
        {
            let mut clips = self.shared.clips.lock();
            let before = clips.len();
            clips.retain(|c| !Arc::ptr_eq(c, clip));
            if clips.len() == before {
                return Err(Error::InvalidInput(format!(
                    "{}: clip is not registered with this engine",
                    clip.name()
                )));
            }
        }
        clip.wait_unassigned();
        clip.shutdown_audio();
        debug!("{}: clip destroyed", clip.name());
        Ok(())
    }

    /// Advance playback for every clip by `dt` seconds and flush their
    /// decoded audio
    ///
    /// The only place playback time advances. Call once per host frame
    /// from a single, consistent thread; it never blocks on decode
    /// progress.
    pub fn tick(&self, dt: f64) {
        let clips: Vec<Arc<VideoClip>> = self.shared.clips.lock().clone();
        for clip in &clips {
            clip.advance(dt);
            clip.flush_decoded_audio();
        }
        self.shared.wake_workers();
    }

    /// Number of decode worker threads
    pub fn worker_count(&self) -> usize {
        self.pool.lock().handles.len()
    }

    /// Resize the worker pool
    ///
    /// Tears the pool down — waiting for each thread to finish its
    /// current unit of work — and spawns a fresh one.
    pub fn set_worker_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidInput(
                "worker count must be at least 1".into(),
            ));
        }
        let mut pool = self.pool.lock();
        Self::teardown_pool(&mut pool);
        *pool = Self::spawn_pool(&self.shared, count);
        info!("worker pool resized to {} threads", count);
        Ok(())
    }

    /// Number of registered clips
    pub fn clip_count(&self) -> usize {
        self.shared.clips.lock().len()
    }
}

impl Drop for VideoEngine {
    fn drop(&mut self) {
        let mut pool = self.pool.lock();
        Self::teardown_pool(&mut pool);
        // workers are gone; clips can be released safely
        self.shared.clips.lock().clear();
    }
}
