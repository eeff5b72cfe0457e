//! A deterministic [`Engine`] implementation.
//!
//! Produces a patterned test card and a phase-continuous square wave instead
//! of real emulation, with full snapshot and battery RAM support. Every
//! output byte is a pure function of the step count and the loaded content,
//! which makes it suitable for exercising the frontend's threading,
//! persistence, and audio paths in tests and demos.

use std::path::Path;

use palmboy_core::{Engine, EngineError, Keys, Model, Platform};

/// Battery region size reported for every content file (32 KiB).
pub const BATTERY_SIZE: usize = 32 * 1024;

/// Square wave frequency in Hz.
const TONE_HZ: u32 = 440;

/// Square wave amplitude.
const AMPLITUDE: i16 = 8000;

const SNAPSHOT_MAGIC: &[u8; 4] = b"PBSS";
const SNAPSHOT_VERSION: u8 = 1;

/// Deterministic engine for tests and demos.
pub struct TestEngine {
    platform: Platform,
    model: Model,
    width: u32,
    height: u32,
    native_rate: u32,
    audio_capacity: usize,

    frame_count: u64,
    keys: Keys,
    /// Square wave phase in native samples since reset.
    phase: u32,
    /// Remainder accumulator for non-integer samples per frame.
    sample_acc: u32,
    /// Mixed from the loaded content bytes; differentiates content.
    seed: u32,

    battery: Vec<u8>,
    battery_dirty: bool,

    pending_left: Vec<i16>,
    pending_right: Vec<i16>,
}

impl TestEngine {
    /// Engine with no content loaded, defaulting to the GBA profile.
    #[must_use]
    pub fn new() -> Self {
        Self {
            platform: Platform::GameBoyAdvance,
            model: Model::Agb,
            width: 240,
            height: 160,
            native_rate: 32_768,
            audio_capacity: 1024,
            frame_count: 0,
            keys: Keys::empty(),
            phase: 0,
            sample_acc: 0,
            seed: 0,
            battery: vec![0; BATTERY_SIZE],
            battery_dirty: false,
            pending_left: Vec::new(),
            pending_right: Vec::new(),
        }
    }

    /// Override the native sample rate (for rate-conversion tests).
    #[must_use]
    pub fn with_native_rate(mut self, rate: u32) -> Self {
        self.native_rate = rate;
        self
    }

    /// Whether a battery restore flagged the region for writeback.
    #[must_use]
    pub fn battery_dirty(&self) -> bool {
        self.battery_dirty
    }

    /// Number of frames stepped since reset.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Classify platform, model, and frame geometry from a file extension.
    fn classify(&mut self, path: &Path) -> Result<(), EngineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let (platform, model, width, height) = match ext.as_str() {
            "gb" => (Platform::GameBoy, Model::Dmg, 256, 224),
            "sgb" => (Platform::GameBoy, Model::Sgb, 256, 224),
            "gbc" => (Platform::GameBoy, Model::Cgb, 256, 224),
            "gba" => (Platform::GameBoyAdvance, Model::Agb, 240, 160),
            _ => return Err(EngineError::UnsupportedContent(path.display().to_string())),
        };

        self.platform = platform;
        self.model = model;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Generate this frame's worth of native-rate samples, phase-continuous
    /// across frames.
    fn generate_audio(&mut self) {
        self.sample_acc += self.native_rate;
        let count = self.sample_acc / 60;
        self.sample_acc %= 60;

        let half_period = (self.native_rate / (TONE_HZ * 2)).max(1);
        for _ in 0..count {
            let level = if (self.phase / half_period) & 1 == 0 {
                AMPLITUDE
            } else {
                -AMPLITUDE
            };
            self.pending_left.push(level);
            self.pending_right.push(level / 4);
            self.phase = self.phase.wrapping_add(1);
        }

        // Respect the configured buffer capacity: drop the oldest samples
        // if the frontend stops draining.
        let cap = self.audio_capacity.max(1) * 8;
        if self.pending_left.len() > cap {
            let excess = self.pending_left.len() - cap;
            self.pending_left.drain(..excess);
            self.pending_right.drain(..excess);
        }
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for TestEngine {
    fn load_content(&mut self, path: &Path) -> Result<(), EngineError> {
        self.classify(path)?;
        let data = std::fs::read(path)?;
        self.seed = data
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        Ok(())
    }

    fn reset(&mut self) {
        self.frame_count = 0;
        self.phase = 0;
        self.sample_acc = 0;
        self.keys = Keys::empty();
        self.battery_dirty = false;
        self.pending_left.clear();
        self.pending_right.clear();
    }

    fn video_dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_audio_buffer_capacity(&mut self, samples: usize) {
        self.audio_capacity = samples;
    }

    fn native_sample_rate(&self) -> u32 {
        self.native_rate
    }

    fn run_frame(&mut self, video: &mut [u8]) {
        let fc = self.frame_count as u8;
        let key_bits = (self.keys.bits() & 0xFF) as u8;
        let tint = (self.seed as u8) ^ self.battery.first().copied().unwrap_or(0);

        for y in 0..self.height {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 4) as usize;
                video[i] = (x as u8) ^ fc;
                video[i + 1] = (y as u8).wrapping_add(key_bits);
                video[i + 2] = tint;
                video[i + 3] = 0xFF;
            }
        }

        self.frame_count += 1;
        self.generate_audio();
    }

    fn drain_audio(&mut self, left: &mut Vec<i16>, right: &mut Vec<i16>) {
        left.append(&mut self.pending_left);
        right.append(&mut self.pending_right);
    }

    fn set_keys(&mut self, keys: Keys) {
        self.keys = keys;
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn model(&self) -> Model {
        self.model
    }

    fn battery_ram(&self) -> &[u8] {
        &self.battery
    }

    fn restore_battery_ram(&mut self, data: &[u8], writeback: bool) {
        let n = data.len().min(self.battery.len());
        self.battery[..n].copy_from_slice(&data[..n]);
        if writeback {
            self.battery_dirty = true;
        }
    }

    fn save_snapshot(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(32 + self.battery.len());
        blob.extend_from_slice(SNAPSHOT_MAGIC);
        blob.push(SNAPSHOT_VERSION);
        blob.extend_from_slice(&self.frame_count.to_le_bytes());
        blob.extend_from_slice(&self.phase.to_le_bytes());
        blob.extend_from_slice(&self.sample_acc.to_le_bytes());
        blob.extend_from_slice(&self.keys.bits().to_le_bytes());
        blob.extend_from_slice(&self.seed.to_le_bytes());
        blob.extend_from_slice(&(self.battery.len() as u32).to_le_bytes());
        blob.extend_from_slice(&self.battery);
        blob
    }

    fn load_snapshot(&mut self, data: &[u8]) -> bool {
        // magic + version + counters + battery length
        if data.len() < 31 || &data[..4] != SNAPSHOT_MAGIC || data[4] != SNAPSHOT_VERSION {
            return false;
        }

        let mut at = 5;
        let mut take = |n: usize| {
            let slice = &data[at..at + n];
            at += n;
            slice
        };

        let frame_count = u64::from_le_bytes(take(8).try_into().unwrap_or_default());
        let phase = u32::from_le_bytes(take(4).try_into().unwrap_or_default());
        let sample_acc = u32::from_le_bytes(take(4).try_into().unwrap_or_default());
        let keys = u16::from_le_bytes(take(2).try_into().unwrap_or_default());
        let seed = u32::from_le_bytes(take(4).try_into().unwrap_or_default());
        let battery_len = u32::from_le_bytes(take(4).try_into().unwrap_or_default()) as usize;
        if data.len() < at + battery_len {
            return false;
        }

        self.frame_count = frame_count;
        self.phase = phase;
        self.sample_acc = sample_acc;
        self.keys = Keys::from_bits(keys);
        self.seed = seed;
        self.battery = data[at..at + battery_len].to_vec();
        self.pending_left.clear();
        self.pending_right.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palmboy_core::KEY_A;

    fn frame(engine: &mut TestEngine) -> Vec<u8> {
        let (w, h) = engine.video_dimensions();
        let mut video = vec![0u8; (w * h * 4) as usize];
        engine.run_frame(&mut video);
        video
    }

    #[test]
    fn output_is_deterministic() {
        let mut a = TestEngine::new();
        let mut b = TestEngine::new();
        for _ in 0..5 {
            assert_eq!(frame(&mut a), frame(&mut b));
        }
    }

    #[test]
    fn keys_affect_output() {
        let mut a = TestEngine::new();
        let mut b = TestEngine::new();
        b.set_keys(Keys::from_bits(KEY_A));
        assert_ne!(frame(&mut a), frame(&mut b));
    }

    #[test]
    fn snapshot_round_trip_restores_output() {
        let mut engine = TestEngine::new();
        for _ in 0..10 {
            frame(&mut engine);
        }
        let snapshot = engine.save_snapshot();
        let reference: Vec<Vec<u8>> = (0..3).map(|_| frame(&mut engine)).collect();

        let mut restored = TestEngine::new();
        assert!(restored.load_snapshot(&snapshot));
        let replayed: Vec<Vec<u8>> = (0..3).map(|_| frame(&mut restored)).collect();
        assert_eq!(reference, replayed);
    }

    #[test]
    fn bad_snapshot_is_rejected() {
        let mut engine = TestEngine::new();
        assert!(!engine.load_snapshot(b"not a snapshot"));
        assert!(!engine.load_snapshot(&[]));
    }

    #[test]
    fn audio_duration_tracks_native_rate() {
        let mut engine = TestEngine::new().with_native_rate(48_000);
        let mut left = Vec::new();
        let mut right = Vec::new();
        // 60 frames is exactly one second of native samples.
        for _ in 0..60 {
            frame(&mut engine);
            engine.drain_audio(&mut left, &mut right);
        }
        assert_eq!(left.len(), 48_000);
        assert_eq!(left.len(), right.len());
    }

    #[test]
    fn battery_restore_marks_dirty_only_on_writeback() {
        let mut engine = TestEngine::new();
        engine.restore_battery_ram(&[1, 2, 3], false);
        assert!(!engine.battery_dirty());
        engine.restore_battery_ram(&[1, 2, 3], true);
        assert!(engine.battery_dirty());
        assert_eq!(&engine.battery_ram()[..3], &[1, 2, 3]);
    }
}
