//! Top-level session driver: window, render/input loop, and teardown order.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gilrs::Gilrs;
use palmboy_core::{Engine, Keys};
use pixels::{Pixels, SurfaceTexture};
use tracing::{info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::audio::{AudioOutput, AudioSink, AudioSync, spawn_audio_pump};
use crate::controller::EngineController;
use crate::display::{Geometry, PANEL_HEIGHT, PANEL_WIDTH, DeviceVariant, blit_rotated, geometry_for};
use crate::error::FrontendError;
use crate::input::{key_mask, read_pad};
use crate::persist::PersistenceManager;
use crate::sync::{CancelToken, FrameSync};

/// Capacity hint handed to the engine's internal audio buffer, in samples.
const ENGINE_AUDIO_CAPACITY: usize = 1024;

/// Configuration for one frontend session.
pub struct RunnerConfig {
    /// Window title.
    pub title: String,
    /// Content file to load into the engine.
    pub content_path: PathBuf,
}

/// Discards audio when no output device exists, so the engine's
/// backpressure path still drains.
struct NullSink;

impl AudioSink for NullSink {
    fn push(&mut self, _interleaved: &[i16]) {}
}

/// Run one session to completion: load, restore, run the loop, persist.
///
/// # Errors
///
/// Any [`FrontendError`]; every variant is fatal to the session. A failed
/// restore aborts before the run loop and skips the exit saves, so a good
/// save on disk is never overwritten with state from a broken startup.
pub fn run(mut engine: Box<dyn Engine>, config: RunnerConfig) -> Result<(), FrontendError> {
    engine.load_content(&config.content_path)?;
    engine.set_audio_buffer_capacity(ENGINE_AUDIO_CAPACITY);
    engine.reset();

    let (width, height) = engine.video_dimensions();
    let variant = DeviceVariant::for_session(engine.platform(), engine.model());
    let geometry = geometry_for(variant, width, height);
    info!(?variant, width, height, "session classified");

    let persist = PersistenceManager::for_content(&config.content_path)?;
    let gilrs = Gilrs::new().map_err(|err| FrontendError::Input(err.to_string()))?;

    let frame = Arc::new(FrameSync::new((width * height * 4) as usize));
    let audio_sync = Arc::new(AudioSync::new());
    let mut controller =
        EngineController::start(engine, Arc::clone(&frame), Arc::clone(&audio_sync))?;

    // Restore inside a bracket, before any frame can be consumed.
    controller.interrupt();
    let restored = controller.with_engine(|engine| -> Result<(), FrontendError> {
        persist.load_state(engine)?;
        persist.load_battery(engine)?;
        Ok(())
    });
    controller.resume();
    if let Err(err) = restored {
        controller.end();
        controller.join();
        return Err(err);
    }

    let cancel = CancelToken::new();
    let native_rate = controller.native_rate_handle();
    // The stream must stay on this thread; the pump gets only the sink.
    let (_audio_output, pump) = match AudioOutput::new(cancel.clone()) {
        Some((output, sink)) => (
            Some(output),
            spawn_audio_pump(Arc::clone(&audio_sync), native_rate, sink, cancel.clone()),
        ),
        None => {
            warn!("no audio device available, sound disabled");
            (
                None,
                spawn_audio_pump(Arc::clone(&audio_sync), native_rate, NullSink, cancel.clone()),
            )
        }
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = RenderInputLoop {
        title: config.title,
        controller: &controller,
        frame: Arc::clone(&frame),
        frame_width: width,
        geometry,
        gilrs,
        window: None,
        pixels: None,
        scratch: Vec::new(),
        last_keys: Keys::empty(),
        failure: None,
    };
    let loop_result = event_loop.run_app(&mut app);

    // Teardown order: wake everything, join the pump, join the engine
    // thread, and only then touch the engine for the exit saves.
    cancel.cancel();
    controller.end();
    let failure = app.failure.take();
    pump.join().expect("audio pump panicked");
    controller.join();

    loop_result?;
    if let Some(err) = failure {
        return Err(err);
    }

    controller.with_engine(|engine| -> Result<(), FrontendError> {
        persist.save_state(engine)?;
        persist.save_battery(engine)
    })?;
    info!("session ended cleanly");
    Ok(())
}

/// The main-thread actor: polls the pad, injects keys, consumes frames
/// through the gate, and presents them rotated.
struct RenderInputLoop<'a> {
    title: String,
    controller: &'a EngineController,
    frame: Arc<FrameSync>,
    frame_width: u32,
    geometry: Geometry,
    gilrs: Gilrs,
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    /// Frame copy taken inside the gate bracket, blitted outside it.
    scratch: Vec<u8>,
    last_keys: Keys,
    failure: Option<FrontendError>,
}

impl RenderInputLoop<'_> {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: FrontendError) {
        self.failure = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for RenderInputLoop<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // The panel is mounted portrait; the window matches it.
        let window = match event_loop.create_window(
            Window::default_attributes()
                .with_title(self.title.clone())
                .with_inner_size(LogicalSize::new(PANEL_WIDTH, PANEL_HEIGHT)),
        ) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.fail(event_loop, FrontendError::Display(err.to_string()));
                return;
            }
        };

        let size = window.inner_size();
        let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
        let pixels = match Pixels::new(PANEL_WIDTH, PANEL_HEIGHT, surface) {
            Ok(pixels) => pixels,
            Err(err) => {
                self.fail(event_loop, FrontendError::Display(err.to_string()));
                return;
            }
        };

        self.window = Some(window);
        // SAFETY: pixels borrows the window, which lives until the loop
        // exits and this struct is torn down with it.
        self.pixels = Some(unsafe { std::mem::transmute::<Pixels<'_>, Pixels<'static>>(pixels) });
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Some(pixels) = &mut self.pixels {
                        pixels.resize_surface(size.width, size.height).ok();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                    && event.state == ElementState::Pressed
                {
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => {
                if let Some(pixels) = &mut self.pixels {
                    if let Err(err) = pixels.render() {
                        self.fail(event_loop, FrontendError::Display(err.to_string()));
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            return;
        }

        let pad = read_pad(&mut self.gilrs);
        if pad.quit || (pad.select && pad.start) {
            event_loop.exit();
            return;
        }

        // Inject the mask only when it changed; an unchanged mask does not
        // need to park the engine thread.
        let keys = key_mask(&pad);
        if keys != self.last_keys {
            self.last_keys = keys;
            self.controller.interrupt();
            self.controller.with_engine(|engine| engine.set_keys(keys));
            self.controller.resume();
        }

        let start = self.frame.wait_frame_start();
        let mut ready = false;
        if let Some(buf) = start.frame() {
            self.scratch.clear();
            self.scratch.extend_from_slice(buf);
            ready = true;
        }
        start.wait_frame_end();

        if ready {
            if let Some(pixels) = &mut self.pixels {
                blit_rotated(
                    &self.scratch,
                    self.frame_width,
                    &self.geometry,
                    pixels.frame_mut(),
                );
            }
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        } else if self.frame.ended() {
            event_loop.exit();
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
