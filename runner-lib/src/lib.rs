//! Frontend runtime for palmboy.
//!
//! Coordinates three independently paced actors (the engine's run thread,
//! the audio pump task, and the render/input loop on the main thread)
//! without tearing or audible glitches, and persists durable engine state
//! across sessions. The emulation engine itself is an external collaborator
//! behind the [`palmboy_core::Engine`] trait.

mod audio;
mod controller;
mod display;
mod error;
mod input;
mod persist;
mod runner;
mod sync;

pub use audio::{
    AudioOutput, AudioSink, AudioSync, CHANNELS, OUTPUT_RATE, RateConverter, RingSink,
    StereoResampler, TARGET_FRAME_RATE, spawn_audio_pump,
};
pub use controller::EngineController;
pub use display::{
    DISPLAY_HEIGHT, DISPLAY_WIDTH, DeviceVariant, DstRect, Geometry, PANEL_HEIGHT, PANEL_WIDTH,
    SrcRect, blit_rotated, geometry_for, rotate_270,
};
pub use error::FrontendError;
pub use input::{PadState, STICK_DEADZONE, key_mask, read_pad};
pub use persist::PersistenceManager;
pub use runner::{RunnerConfig, run};
pub use sync::{CancelToken, FrameStart, FrameSync};
