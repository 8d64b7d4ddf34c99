//! Decode worker threads
//!
//! Workers are symmetric and interchangeable: each one loops waiting
//! for a wake signal (or a short timeout, so no signal is ever load
//! bearing), asks the engine for the clip most in need of service,
//! performs any pending seek, decodes exactly one frame, and releases
//! the clip. Shutdown is cooperative; a worker always finishes its
//! current unit of work.

use super::EngineShared;
use crossbeam_channel::RecvTimeoutError;
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(super) fn worker_loop(id: usize, shared: Arc<EngineShared>, shutdown: Arc<AtomicBool>) {
    let timeout = Duration::from_millis(shared.config.workers.wake_timeout_ms.max(1));
    trace!("worker {} started", id);

    while !shutdown.load(Ordering::Acquire) {
        match shared.wake_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Some(clip) = shared.request_work(id) {
            if clip.has_pending_seek() {
                clip.do_seek();
            }
            clip.decode_next_frame();
            clip.release_assignment();

            if shutdown.load(Ordering::Acquire) {
                break;
            }
        }
    }
    trace!("worker {} stopped", id);
}
