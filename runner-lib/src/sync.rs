//! Frame rendezvous between the engine thread and the render thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How long `wait_frame_start` waits for a frame before reporting not-ready.
const FRAME_WAIT: Duration = Duration::from_millis(50);

/// Cooperative cancellation token handed to every concurrent task at spawn.
///
/// Checked at each loop iteration; shutdown additionally joins every task
/// explicitly rather than relying on flag visibility alone.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct FrameState {
    buffer: Vec<u8>,
    /// A completed frame is waiting for the render thread.
    pending: bool,
    /// When false the publisher never blocks on the handshake. Cleared
    /// while an interrupt is pending so the engine can reach its safe
    /// boundary even though the render thread is the one interrupting.
    wait_enabled: bool,
    ended: bool,
}

/// Two-phase frame gate, one instance per session.
///
/// The engine thread publishes each completed frame with
/// [`publish_frame`](FrameSync::publish_frame); the render thread brackets
/// every read between [`wait_frame_start`](FrameSync::wait_frame_start) and
/// the consuming [`FrameStart::wait_frame_end`]. A single "frame ready"
/// flag would not be enough: the reader must not start copying before the
/// writer has finished the frame, but must also not miss frames when it
/// runs slower than the engine steps. The start/end pair brackets exactly
/// the window in which the buffer is stable, and the buffer is only ever
/// written under the same lock the reader holds for the whole bracket.
pub struct FrameSync {
    state: Mutex<FrameState>,
    /// Signalled by the engine when a frame becomes pending.
    available: Condvar,
    /// Signalled by the render thread when it is done with the buffer.
    required: Condvar,
}

impl FrameSync {
    /// Gate over a frame buffer of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            state: Mutex::new(FrameState {
                buffer: vec![0; len],
                pending: false,
                wait_enabled: true,
                ended: false,
            }),
            available: Condvar::new(),
            required: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().expect("frame sync lock poisoned")
    }

    /// Called by the engine thread once per completed frame. `render` runs
    /// under the gate's lock and must fill the whole buffer. Blocks until
    /// the previous frame's end handshake has completed (the single-buffer
    /// invariant), and again until this frame has been consumed, which is
    /// what paces the engine to the render rate.
    pub fn publish_frame(&self, render: impl FnOnce(&mut [u8])) {
        let mut state = self.lock_state();
        while state.pending && state.wait_enabled && !state.ended {
            state = self.required.wait(state).expect("frame sync lock poisoned");
        }
        if state.ended {
            return;
        }

        render(&mut state.buffer);
        state.pending = true;
        self.available.notify_one();

        while state.pending && state.wait_enabled && !state.ended {
            state = self.required.wait(state).expect("frame sync lock poisoned");
        }
    }

    /// Called by the render thread. Blocks (bounded) until the engine has
    /// published a frame; the returned guard reports whether one is
    /// actually ready and must be closed with [`FrameStart::wait_frame_end`]
    /// either way to keep the handshake balanced.
    #[must_use = "the guard must be closed with wait_frame_end"]
    pub fn wait_frame_start(&self) -> FrameStart<'_> {
        let mut state = self.lock_state();
        if !state.pending && !state.ended {
            let (guard, _timeout) = self
                .available
                .wait_timeout(state, FRAME_WAIT)
                .expect("frame sync lock poisoned");
            state = guard;
        }
        let ready = state.pending && !state.ended;
        FrameStart {
            sync: self,
            state: Some(state),
            ready,
        }
    }

    /// Disable or re-enable publisher pacing. Used by the controller while
    /// an interrupt is pending.
    pub(crate) fn set_wait(&self, enabled: bool) {
        let mut state = self.lock_state();
        state.wait_enabled = enabled;
        if !enabled {
            self.required.notify_all();
        }
    }

    /// Permanently release both sides of the gate.
    pub fn end(&self) {
        let mut state = self.lock_state();
        state.ended = true;
        self.available.notify_all();
        self.required.notify_all();
    }

    /// Whether [`end`](FrameSync::end) has been called.
    #[must_use]
    pub fn ended(&self) -> bool {
        self.lock_state().ended
    }
}

/// The open half of a frame-start/frame-end bracket.
///
/// Holds the gate's lock, so the engine cannot touch the buffer until the
/// bracket closes. Dropping the guard closes it; `wait_frame_end` is the
/// explicit form.
pub struct FrameStart<'a> {
    sync: &'a FrameSync,
    state: Option<MutexGuard<'a, FrameState>>,
    ready: bool,
}

impl FrameStart<'_> {
    /// The stable frame buffer, or `None` if no frame was ready.
    #[must_use]
    pub fn frame(&self) -> Option<&[u8]> {
        if !self.ready {
            return None;
        }
        self.state.as_deref().map(|s| s.buffer.as_slice())
    }

    /// Close the bracket: the buffer is handed back to the engine.
    pub fn wait_frame_end(self) {
        // Drop does the work; the method exists so call sites read as the
        // two-phase protocol they implement.
    }
}

impl Drop for FrameStart<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.state.take() {
            if self.ready {
                state.pending = false;
            }
            self.sync.required.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn exercise(frames: u32, producer_delay: Duration, consumer_delay: Duration) -> u32 {
        let sync = Arc::new(FrameSync::new(64));

        let producer = thread::spawn({
            let sync = Arc::clone(&sync);
            move || {
                for i in 0..frames {
                    sync.publish_frame(|buf| buf.fill(i as u8));
                    if !producer_delay.is_zero() {
                        thread::sleep(producer_delay);
                    }
                }
                sync.end();
            }
        });

        let mut seen = 0;
        loop {
            let start = sync.wait_frame_start();
            let ready = if let Some(buf) = start.frame() {
                // The bracket guarantees a stable buffer: every byte must
                // belong to the same published frame.
                let first = buf[0];
                assert!(buf.iter().all(|&b| b == first), "torn frame read");
                seen += 1;
                true
            } else {
                false
            };
            // Close the bracket before touching the gate again: the guard
            // holds the gate's lock, so ended() must not run under it.
            drop(start);
            if !ready && sync.ended() {
                break;
            }
            if !consumer_delay.is_zero() {
                thread::sleep(consumer_delay);
            }
        }

        producer.join().expect("producer panicked");
        seen
    }

    #[test]
    fn consumer_keeps_up_with_equal_rates() {
        let seen = exercise(40, Duration::ZERO, Duration::ZERO);
        assert!(seen > 0);
    }

    #[test]
    fn slow_consumer_never_tears_or_deadlocks() {
        let seen = exercise(20, Duration::ZERO, Duration::from_millis(2));
        assert!(seen > 0);
    }

    #[test]
    fn slow_producer_reports_not_ready_then_recovers() {
        let seen = exercise(5, Duration::from_millis(10), Duration::ZERO);
        // Pacing blocks the producer until each frame is consumed, so a
        // slow producer must still get every frame through.
        assert_eq!(seen, 5);
    }

    #[test]
    fn not_ready_guard_still_balances_the_handshake() {
        let sync = FrameSync::new(16);
        // No producer: the start must time out, report not-ready, and the
        // end must not panic or wedge the gate.
        let start = sync.wait_frame_start();
        assert!(start.frame().is_none());
        start.wait_frame_end();

        let start = sync.wait_frame_start();
        assert!(start.frame().is_none());
        start.wait_frame_end();
    }

    #[test]
    fn end_unblocks_a_waiting_publisher() {
        let sync = Arc::new(FrameSync::new(16));
        // First publish parks waiting for consumption.
        let publisher = thread::spawn({
            let sync = Arc::clone(&sync);
            move || {
                sync.publish_frame(|buf| buf.fill(1));
                sync.publish_frame(|buf| buf.fill(2));
            }
        });
        thread::sleep(Duration::from_millis(20));
        sync.end();
        publisher.join().expect("publisher wedged");
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
