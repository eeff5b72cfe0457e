//! Engine thread ownership and the interrupt/resume bracket.
//!
//! The engine runs on its own thread, paced by the frame gate and the audio
//! ring's backpressure. Any other thread that needs to mutate the engine
//! (keys, snapshots, battery RAM) first parks it at a frame boundary with
//! [`EngineController::interrupt`], mutates through
//! [`EngineController::with_engine`], and releases it with
//! [`EngineController::resume`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use palmboy_core::Engine;
use tracing::debug;

use crate::audio::AudioSync;
use crate::error::FrontendError;
use crate::sync::FrameSync;

/// How long to wait for the engine thread to report itself started.
const START_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Control {
    started: bool,
    /// An interrupting thread wants the engine parked.
    interrupt_requested: bool,
    /// The engine thread is parked at its frame boundary.
    parked: bool,
    ending: bool,
}

struct Shared {
    control: Mutex<Control>,
    cond: Condvar,
    engine: Mutex<Box<dyn Engine>>,
    native_rate: Arc<AtomicU32>,
}

/// Handle to the running engine thread.
pub struct EngineController {
    shared: Arc<Shared>,
    frame: Arc<FrameSync>,
    audio: Arc<AudioSync>,
    handle: Option<JoinHandle<()>>,
}

impl EngineController {
    /// Spawn the engine thread and wait (bounded) for it to start stepping.
    ///
    /// # Errors
    ///
    /// [`FrontendError::EngineStart`] if the thread does not report started
    /// within the timeout.
    pub fn start(
        engine: Box<dyn Engine>,
        frame: Arc<FrameSync>,
        audio: Arc<AudioSync>,
    ) -> Result<Self, FrontendError> {
        let native_rate = Arc::new(AtomicU32::new(engine.native_sample_rate()));
        let shared = Arc::new(Shared {
            control: Mutex::new(Control::default()),
            cond: Condvar::new(),
            engine: Mutex::new(engine),
            native_rate,
        });

        let handle = thread::Builder::new()
            .name("engine".into())
            .spawn({
                let shared = Arc::clone(&shared);
                let frame = Arc::clone(&frame);
                let audio = Arc::clone(&audio);
                move || run_engine(&shared, &frame, &audio)
            })
            .expect("failed to spawn engine thread");

        let control = shared.control.lock().expect("control lock poisoned");
        let (control, timeout) = shared
            .cond
            .wait_timeout_while(control, START_TIMEOUT, |c| !c.started)
            .expect("control lock poisoned");
        if !control.started {
            debug_assert!(timeout.timed_out());
            return Err(FrontendError::EngineStart);
        }
        drop(control);

        Ok(Self {
            shared,
            frame,
            audio,
            handle: Some(handle),
        })
    }

    /// Park the engine thread at its next frame boundary. Blocks until it
    /// is parked; must be balanced by [`resume`](EngineController::resume).
    ///
    /// Frame pacing is disabled for the duration so the engine can finish a
    /// frame the render thread will never consume (the render thread is
    /// usually the caller here).
    pub fn interrupt(&self) {
        self.frame.set_wait(false);
        let mut control = self.shared.control.lock().expect("control lock poisoned");
        control.interrupt_requested = true;
        self.shared.cond.notify_all();
        while !control.parked && !control.ending {
            control = self
                .shared
                .cond
                .wait(control)
                .expect("control lock poisoned");
        }
    }

    /// Release an interrupted engine thread and restore frame pacing.
    pub fn resume(&self) {
        {
            let mut control = self.shared.control.lock().expect("control lock poisoned");
            control.interrupt_requested = false;
            self.shared.cond.notify_all();
        }
        self.frame.set_wait(true);
    }

    /// Whether the engine thread has reported itself started.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.shared.control.lock().expect("control lock poisoned").started
    }

    /// Run `f` against the engine. Callable only inside an interrupt bracket
    /// or after [`end`](EngineController::end); the bracket discipline is
    /// the API, and debug builds assert it.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut dyn Engine) -> R) -> R {
        #[cfg(debug_assertions)]
        {
            let control = self.shared.control.lock().expect("control lock poisoned");
            assert!(
                control.parked || control.ending,
                "engine mutated outside an interrupt bracket"
            );
        }
        let mut engine = self.shared.engine.lock().expect("engine lock poisoned");
        f(engine.as_mut())
    }

    /// Handle to the engine's current native sample rate, refreshed after
    /// every frame. The audio pump reads it each iteration.
    #[must_use]
    pub fn native_rate_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.shared.native_rate)
    }

    /// Ask the engine thread to exit, waking it wherever it is blocked.
    pub fn end(&self) {
        {
            let mut control = self.shared.control.lock().expect("control lock poisoned");
            control.ending = true;
            self.shared.cond.notify_all();
        }
        self.frame.set_wait(false);
        self.frame.end();
        self.audio.end();
    }

    /// Wait for the engine thread to exit. Call [`end`](EngineController::end)
    /// first or this never returns.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("engine thread panicked");
        }
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.end();
            let _ = handle.join();
        }
    }
}

fn run_engine(shared: &Shared, frame: &FrameSync, audio: &AudioSync) {
    debug!("engine thread started");
    {
        let mut control = shared.control.lock().expect("control lock poisoned");
        control.started = true;
        shared.cond.notify_all();
    }

    let mut left: Vec<i16> = Vec::new();
    let mut right: Vec<i16> = Vec::new();

    loop {
        {
            let mut control = shared.control.lock().expect("control lock poisoned");
            while control.interrupt_requested && !control.ending {
                control.parked = true;
                shared.cond.notify_all();
                control = shared.cond.wait(control).expect("control lock poisoned");
            }
            control.parked = false;
            if control.ending {
                break;
            }
        }

        {
            let mut engine = shared.engine.lock().expect("engine lock poisoned");
            frame.publish_frame(|buf| engine.run_frame(buf));
            left.clear();
            right.clear();
            engine.drain_audio(&mut left, &mut right);
            shared
                .native_rate
                .store(engine.native_sample_rate(), Ordering::Relaxed);
        }

        // The engine lock is released before the audio handshake so an
        // interrupter is never stuck behind backpressure.
        audio.produce(&left, &right);
    }

    // Wake anything still waiting on either gate.
    frame.end();
    audio.end();
    debug!("engine thread exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use palmboy_core::{KEY_A, KEY_START, Keys};
    use palmboy_test_engine::TestEngine;

    fn start_controller() -> (EngineController, Arc<FrameSync>, Arc<AudioSync>) {
        let engine = TestEngine::new();
        let (w, h) = engine.video_dimensions();
        let frame = Arc::new(FrameSync::new((w * h * 4) as usize));
        let audio = Arc::new(AudioSync::new());
        let controller =
            EngineController::start(Box::new(engine), Arc::clone(&frame), Arc::clone(&audio))
                .expect("engine failed to start");
        (controller, frame, audio)
    }

    /// Consume frames until `pred` holds for one, up to `limit` frames.
    fn consume_until(frame: &FrameSync, limit: u32, pred: impl Fn(&[u8]) -> bool) -> bool {
        for _ in 0..limit {
            let start = frame.wait_frame_start();
            let hit = start.frame().is_some_and(&pred);
            start.wait_frame_end();
            if hit {
                return true;
            }
        }
        false
    }

    #[test]
    fn frames_flow_and_shutdown_is_clean() {
        let (mut controller, frame, _audio) = start_controller();
        assert!(consume_until(&frame, 10, |buf| buf[3] == 0xFF));
        controller.end();
        controller.join();
    }

    #[test]
    fn keys_set_in_a_bracket_reach_the_engine() {
        let (mut controller, frame, _audio) = start_controller();
        let keys = Keys::from_bits(KEY_A | KEY_START);

        controller.interrupt();
        controller.with_engine(|engine| engine.set_keys(keys));
        controller.resume();

        // Pixel (0, 0): green channel carries the low key bits.
        let expected = (keys.bits() & 0xFF) as u8;
        assert!(
            consume_until(&frame, 10, |buf| buf[1] == expected),
            "key mask never appeared in the video output"
        );
        controller.end();
        controller.join();
    }

    #[test]
    fn interrupt_parks_even_while_pacing_blocks() {
        let (mut controller, frame, _audio) = start_controller();
        // Nobody is consuming frames, so the engine is blocked inside the
        // pacing handshake. The interrupt must still get it parked.
        thread::sleep(Duration::from_millis(20));
        controller.interrupt();
        let count = controller.with_engine(|engine| {
            engine.reset();
            0u32
        });
        assert_eq!(count, 0);
        controller.resume();

        assert!(consume_until(&frame, 5, |_| true));
        controller.end();
        controller.join();
    }

    #[test]
    fn end_during_interrupt_does_not_wedge() {
        let (mut controller, _frame, _audio) = start_controller();
        controller.interrupt();
        controller.end();
        controller.join();
    }

    #[test]
    fn native_rate_handle_tracks_the_engine() {
        let engine = TestEngine::new().with_native_rate(48_000);
        let (w, h) = engine.video_dimensions();
        let frame = Arc::new(FrameSync::new((w * h * 4) as usize));
        let audio = Arc::new(AudioSync::new());
        let mut controller =
            EngineController::start(Box::new(engine), Arc::clone(&frame), Arc::clone(&audio))
                .expect("engine failed to start");

        assert_eq!(controller.native_rate_handle().load(Ordering::Relaxed), 48_000);
        controller.end();
        controller.join();
    }
}
