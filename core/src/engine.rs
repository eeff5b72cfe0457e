//! Engine abstraction for the frontend.
//!
//! The emulation engine is an external collaborator: the frontend treats it
//! as an opaque stepping/state machine behind the [`Engine`] trait and never
//! assumes anything about its internals beyond this contract. All mutation
//! from outside the engine's own thread must happen inside an
//! interrupt/resume bracket managed by the frontend's controller.

use std::path::Path;

use crate::Keys;

/// Hardware platform family reported by a loaded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Game Boy family (DMG, SGB, CGB). Battery RAM restores on this
    /// platform must be flagged for writeback so they persist at exit.
    GameBoy,
    /// Game Boy Advance.
    GameBoyAdvance,
}

/// Hardware model detected from the loaded content's metadata.
///
/// Fixed at load time; the frontend maps it to a display variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Original monochrome Game Boy.
    Dmg,
    /// Super Game Boy (border-inclusive frame layout).
    Sgb,
    /// Game Boy Color.
    Cgb,
    /// Game Boy Advance.
    Agb,
}

/// Errors surfaced while loading content into an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("failed to read content file")]
    ContentIo(#[from] std::io::Error),
}

/// An opaque emulation engine.
///
/// One instance corresponds to one running session. The frontend drives it
/// with the following protocol:
///
/// 1. [`load_content`](Engine::load_content), then configuration
///    ([`set_audio_buffer_capacity`](Engine::set_audio_buffer_capacity)),
///    then [`reset`](Engine::reset).
/// 2. [`run_frame`](Engine::run_frame) repeatedly from the engine thread,
///    each call followed by [`drain_audio`](Engine::drain_audio).
/// 3. Snapshot/battery/key operations only while the engine thread is
///    parked in an interrupt bracket (or after it has been joined).
pub trait Engine: Send {
    /// Load a content file. The engine classifies platform and model from
    /// the content's metadata during this call.
    fn load_content(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Reset to the power-on state. Required before the first frame.
    fn reset(&mut self);

    /// Native frame dimensions in pixels, fixed per session after load.
    fn video_dimensions(&self) -> (u32, u32);

    /// Capacity hint for the engine's internal audio buffer, in samples.
    fn set_audio_buffer_capacity(&mut self, samples: usize);

    /// The sample rate audio is currently produced at. May differ from the
    /// output device rate and may change with content characteristics, so
    /// callers must re-read it before converting samples.
    fn native_sample_rate(&self) -> u32;

    /// Step one frame of emulation, rendering into `video` as RGBA with a
    /// row stride equal to the native width. `video` must hold
    /// `width * height * 4` bytes.
    fn run_frame(&mut self, video: &mut [u8]);

    /// Append the native-rate stereo samples produced since the last drain.
    fn drain_audio(&mut self, left: &mut Vec<i16>, right: &mut Vec<i16>);

    /// Replace the current button mask.
    fn set_keys(&mut self, keys: Keys);

    /// Platform family of the loaded content.
    fn platform(&self) -> Platform;

    /// Model detected from the loaded content.
    fn model(&self) -> Model;

    /// The battery-backed memory region. Size is determined by the loaded
    /// content; empty if the content has no battery.
    fn battery_ram(&self) -> &[u8];

    /// Restore the battery-backed region from a raw image. When `writeback`
    /// is set the region must be marked dirty so it is persisted again at
    /// exit even without further writes.
    fn restore_battery_ram(&mut self, data: &[u8], writeback: bool);

    /// Serialize the complete engine state into a snapshot blob.
    fn save_snapshot(&self) -> Vec<u8>;

    /// Restore state from a snapshot blob. Returns `false` if the blob is
    /// not a snapshot this engine can restore.
    fn load_snapshot(&mut self, data: &[u8]) -> bool;
}
