//! Audio rate conversion, the pump task, and the output sink.
//!
//! The engine produces stereo samples at its native clock rate, which can
//! differ from the fixed output device rate and can change with content
//! characteristics. A shared [`StereoResampler`] absorbs the mismatch; the
//! pump task drains it at the output rate and feeds the cpal stream through
//! an SPSC ring. Backpressure flows both ways: the engine thread blocks
//! when the resampler backlog passes its high-water mark, and the pump
//! blocks when the output ring is full.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use tracing::{debug, warn};

use crate::sync::CancelToken;

/// Fixed output device sample rate in Hz.
pub const OUTPUT_RATE: u32 = 44_100;

/// Output channel count (interleaved stereo).
pub const CHANNELS: usize = 2;

/// Display frame rate the pump paces against. One output frame's worth of
/// samples (`OUTPUT_RATE / TARGET_FRAME_RATE`) is the drain threshold.
pub const TARGET_FRAME_RATE: u32 = 60;

/// Native samples queued per channel above which the producer blocks.
const BACKLOG_HIGH_WATER: usize = 8 * 1024;

/// Converts a variable native-rate sample stream to a fixed output rate.
///
/// Pull-based: the producer pushes native samples, the consumer queries how
/// many output samples are available and reads them off with linear
/// interpolation. Rates may be changed between any two reads; conversion
/// state (the fractional read position) is preserved across rate changes.
pub struct RateConverter {
    queue: VecDeque<i16>,
    /// Fractional read position into `queue`, in native samples.
    pos: f64,
    /// Native samples consumed per output sample.
    step: f64,
}

impl RateConverter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            pos: 0.0,
            step: 1.0,
        }
    }

    /// Recompute the conversion ratio. Must be called whenever the native
    /// rate may have changed, before any samples are read.
    pub fn set_rates(&mut self, native: u32, output: u32) {
        self.step = f64::from(native.max(1)) / f64::from(output.max(1));
    }

    /// Queue native-rate samples for conversion.
    pub fn push(&mut self, samples: &[i16]) {
        self.queue.extend(samples);
    }

    /// Native samples queued and not yet consumed.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.queue.len().saturating_sub(self.pos as usize)
    }

    /// Output samples currently readable.
    #[must_use]
    pub fn available(&self) -> usize {
        if self.queue.len() < 2 {
            return 0;
        }
        let last = (self.queue.len() - 1) as f64;
        if self.pos > last {
            return 0;
        }
        ((last - self.pos) / self.step) as usize + 1
    }

    /// Read up to `count` output samples, writing one sample every `stride`
    /// slots of `out` starting at `offset` (interleaving support). Returns
    /// the number of samples written. Consumed history is reclaimed.
    pub fn read(&mut self, out: &mut [i16], count: usize, stride: usize, offset: usize) -> usize {
        let n = count
            .min(self.available())
            .min(out.len().saturating_sub(offset).div_ceil(stride.max(1)));

        for i in 0..n {
            let idx = self.pos as usize;
            let frac = self.pos - idx as f64;
            let a = f64::from(self.queue[idx]);
            let b = self
                .queue
                .get(idx + 1)
                .copied()
                .map_or(a, f64::from);
            out[offset + i * stride] = (a + (b - a) * frac) as i16;
            self.pos += self.step;
        }

        let consumed = (self.pos as usize).min(self.queue.len());
        self.queue.drain(..consumed);
        self.pos -= consumed as f64;
        n
    }
}

impl Default for RateConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Paired per-channel converters with interleaved reads.
pub struct StereoResampler {
    left: RateConverter,
    right: RateConverter,
}

impl StereoResampler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            left: RateConverter::new(),
            right: RateConverter::new(),
        }
    }

    /// Refresh both channels' conversion ratios.
    pub fn set_rates(&mut self, native: u32, output: u32) {
        self.left.set_rates(native, output);
        self.right.set_rates(native, output);
    }

    pub fn push(&mut self, left: &[i16], right: &[i16]) {
        self.left.push(left);
        self.right.push(right);
    }

    /// Output sample pairs currently readable.
    #[must_use]
    pub fn available(&self) -> usize {
        self.left.available().min(self.right.available())
    }

    /// Larger of the two channels' native backlogs.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.left.backlog().max(self.right.backlog())
    }

    /// Read as many interleaved LR pairs as fit into `out`. Returns the
    /// number of pairs written.
    pub fn read_interleaved(&mut self, out: &mut [i16]) -> usize {
        let count = (out.len() / CHANNELS).min(self.available());
        self.left.read(out, count, CHANNELS, 0);
        self.right.read(out, count, CHANNELS, 1);
        count
    }
}

impl Default for StereoResampler {
    fn default() -> Self {
        Self::new()
    }
}

struct AudioState {
    resampler: StereoResampler,
    ended: bool,
}

/// The shared audio ring: a lock around the resampler plus the consume
/// acknowledgement that lets the producer side reclaim space.
///
/// The engine thread produces with [`produce`](AudioSync::produce); the
/// pump task drains via [`lock`](AudioSync::lock). Failing to acknowledge
/// consumption would grow the backlog without bound and eventually stall
/// the engine, so the acknowledgement is tied to [`AudioLock::consume`].
pub struct AudioSync {
    state: Mutex<AudioState>,
    consumed: Condvar,
}

impl AudioSync {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AudioState {
                resampler: StereoResampler::new(),
                ended: false,
            }),
            consumed: Condvar::new(),
        }
    }

    /// Queue one frame's worth of native samples, then block while the
    /// backlog is above the high-water mark. This is the producer side of
    /// the backpressure protocol; call it with no other locks held.
    pub fn produce(&self, left: &[i16], right: &[i16]) {
        let mut state = self.state.lock().expect("audio sync lock poisoned");
        state.resampler.push(left, right);
        while state.resampler.backlog() > BACKLOG_HIGH_WATER && !state.ended {
            state = self
                .consumed
                .wait(state)
                .expect("audio sync lock poisoned");
        }
    }

    /// Lock the ring for draining. Release promptly; never sleep or push
    /// to a blocking sink while holding the lock, or the producer starves.
    #[must_use]
    pub fn lock(&self) -> AudioLock<'_> {
        AudioLock {
            sync: self,
            guard: self.state.lock().expect("audio sync lock poisoned"),
        }
    }

    /// Permanently release a producer blocked on backpressure.
    pub fn end(&self) {
        let mut state = self.state.lock().expect("audio sync lock poisoned");
        state.ended = true;
        self.consumed.notify_all();
    }
}

impl Default for AudioSync {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while the pump inspects or drains the ring.
pub struct AudioLock<'a> {
    sync: &'a AudioSync,
    guard: MutexGuard<'a, AudioState>,
}

impl AudioLock<'_> {
    /// Refresh both channels' rate parameters. Done on every pump
    /// iteration before reading, since the native rate can change.
    pub fn set_rates(&mut self, native: u32, output: u32) {
        self.guard.resampler.set_rates(native, output);
    }

    /// Output sample pairs currently readable.
    #[must_use]
    pub fn available(&self) -> usize {
        self.guard.resampler.available()
    }

    /// Read interleaved LR pairs; returns pairs written.
    pub fn read_interleaved(&mut self, out: &mut [i16]) -> usize {
        self.guard.resampler.read_interleaved(out)
    }

    /// Acknowledge consumption and release the lock, waking the producer.
    /// Dropping the lock without calling this releases it without the
    /// acknowledgement (the not-enough-samples path).
    pub fn consume(self) {
        self.sync.consumed.notify_all();
    }
}

/// Sink accepting interleaved stereo blocks at the output rate.
pub trait AudioSink: Send {
    /// Push one block. May block for sink-side backpressure.
    fn push(&mut self, interleaved: &[i16]);
}

/// cpal-backed audio device. Owns the stream; must stay on the thread that
/// created it (cpal streams are not `Send`), so the pump gets the paired
/// [`RingSink`] instead.
pub struct AudioOutput {
    _stream: Stream,
}

impl AudioOutput {
    /// Open the default output device at [`OUTPUT_RATE`], stereo.
    ///
    /// Returns `None` if no device is available.
    #[must_use]
    pub fn new(cancel: CancelToken) -> Option<(Self, RingSink)> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;

        let config = StreamConfig {
            channels: CHANNELS as u16,
            sample_rate: SampleRate(OUTPUT_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let block = (OUTPUT_RATE / TARGET_FRAME_RATE) as usize * CHANNELS;
        let ring = HeapRb::<i16>::new(block * 8);
        let (mut producer, mut consumer) = ring.split();

        // Pre-fill with silence so the callback does not underrun before
        // the pump's first block arrives.
        for _ in 0..block * 4 {
            let _ = producer.try_push(0);
        }

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        // Silence on underrun to avoid clicks.
                        *sample = consumer.try_pop().unwrap_or(0);
                    }
                },
                |err| warn!("audio stream error: {err}"),
                None,
            )
            .ok()?;
        stream.play().ok()?;

        debug!(rate = OUTPUT_RATE, "audio output opened");
        Some((Self { _stream: stream }, RingSink { producer, cancel }))
    }
}

/// The producer half of the output ring; what the pump actually pushes to.
pub struct RingSink {
    producer: ringbuf::HeapProd<i16>,
    cancel: CancelToken,
}

impl AudioSink for RingSink {
    fn push(&mut self, interleaved: &[i16]) {
        for &sample in interleaved {
            // A full ring is the device telling us to slow down; spin-yield
            // until space opens, bailing out on cancellation.
            while self.producer.try_push(sample).is_err() {
                if self.cancel.is_cancelled() {
                    return;
                }
                thread::yield_now();
            }
        }
    }
}

/// Spawn the audio pump task.
///
/// Each iteration refreshes the rate parameters from the engine's current
/// native frequency, drains the ring when at least one output frame's worth
/// of converted samples is available, and otherwise releases the lock and
/// yields. Runs until `cancel` trips; the caller joins the handle before
/// teardown.
pub fn spawn_audio_pump(
    sync: Arc<AudioSync>,
    native_rate: Arc<AtomicU32>,
    mut sink: impl AudioSink + 'static,
    cancel: CancelToken,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("audio-pump".into())
        .spawn(move || {
            debug!("audio pump started");
            let threshold = (OUTPUT_RATE / TARGET_FRAME_RATE) as usize;
            let mut block: Vec<i16> = Vec::new();

            while !cancel.is_cancelled() {
                let mut ring = sync.lock();
                ring.set_rates(native_rate.load(Ordering::Relaxed), OUTPUT_RATE);

                let available = ring.available();
                if available >= threshold {
                    block.resize(available * CHANNELS, 0);
                    let pairs = ring.read_interleaved(&mut block);
                    ring.consume();
                    block.truncate(pairs * CHANNELS);
                    // The sink may block; the ring lock is already gone.
                    sink.push(&block);
                } else {
                    drop(ring);
                    thread::sleep(Duration::from_millis(1));
                }
            }
            debug!("audio pump exited");
        })
        .expect("failed to spawn audio pump thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Total output duration must match total input duration to within one
    /// output frame, whichever direction the rates differ in.
    #[test]
    fn conversion_preserves_duration() {
        let pairs = [(32_768u32, 44_100u32), (48_000, 44_100), (44_100, 22_050)];
        for (native, output) in pairs {
            let mut conv = RateConverter::new();
            conv.set_rates(native, output);

            // One second of native input.
            let input: Vec<i16> = (0..native).map(|i| (i % 251) as i16).collect();
            conv.push(&input);

            let mut out = vec![0i16; output as usize * 2];
            let mut total = 0;
            loop {
                let n = conv.read(&mut out, conv.available(), 1, 0);
                if n == 0 {
                    break;
                }
                total += n;
            }

            let block = (output / TARGET_FRAME_RATE) as usize;
            let expected = output as usize;
            assert!(
                total.abs_diff(expected) <= block,
                "{native}->{output}: got {total} samples, expected ~{expected}"
            );
        }
    }

    #[test]
    fn unity_rate_passes_samples_through() {
        let mut conv = RateConverter::new();
        conv.set_rates(1000, 1000);
        conv.push(&[10, 20, 30, 40]);

        let mut out = [0i16; 4];
        let n = conv.read(&mut out, 4, 1, 0);
        assert_eq!(n, 4);
        assert_eq!(out, [10, 20, 30, 40]);
    }

    #[test]
    fn availability_respects_the_ratio() {
        let mut conv = RateConverter::new();
        // Downsampling 2:1 - 100 native samples are ~50 output samples.
        conv.set_rates(2000, 1000);
        conv.push(&vec![0i16; 100]);
        let avail = conv.available();
        assert!((49..=50).contains(&avail), "available = {avail}");
    }

    #[test]
    fn interleaved_read_pairs_channels() {
        let mut resampler = StereoResampler::new();
        resampler.set_rates(1000, 1000);
        resampler.push(&[1, 2, 3, 4], &[-1, -2, -3, -4]);

        let mut out = [0i16; 6];
        let pairs = resampler.read_interleaved(&mut out);
        assert_eq!(pairs, 3);
        assert_eq!(out, [1, -1, 2, -2, 3, -3]);
    }

    #[test]
    fn rate_change_mid_stream_keeps_converting() {
        let mut conv = RateConverter::new();
        conv.set_rates(32_768, OUTPUT_RATE);
        conv.push(&vec![100i16; 4096]);
        let mut out = vec![0i16; 8192];
        let first = conv.read(&mut out, 1024, 1, 0);
        assert_eq!(first, 1024);

        // Content characteristics changed: refresh and keep reading.
        conv.set_rates(48_000, OUTPUT_RATE);
        conv.push(&vec![100i16; 4096]);
        let second = conv.read(&mut out, 1024, 1, 0);
        assert_eq!(second, 1024);
    }

    struct CollectSink(Arc<Mutex<Vec<i16>>>);

    impl AudioSink for CollectSink {
        fn push(&mut self, interleaved: &[i16]) {
            self.0
                .lock()
                .expect("sink lock poisoned")
                .extend_from_slice(interleaved);
        }
    }

    #[test]
    fn pump_drains_blocks_and_acknowledges() {
        let sync = Arc::new(AudioSync::new());
        let native_rate = Arc::new(AtomicU32::new(OUTPUT_RATE));
        let collected = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancelToken::new();

        let pump = spawn_audio_pump(
            Arc::clone(&sync),
            Arc::clone(&native_rate),
            CollectSink(Arc::clone(&collected)),
            cancel.clone(),
        );

        // Feed two output-frames' worth; the producer must not block since
        // the pump keeps acknowledging.
        let frame = (OUTPUT_RATE / TARGET_FRAME_RATE) as usize;
        let samples = vec![42i16; frame * 2];
        sync.produce(&samples, &samples);

        // Wait until the pump has pushed at least one block.
        for _ in 0..500 {
            if !collected.lock().expect("sink lock poisoned").is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        cancel.cancel();
        sync.end();
        pump.join().expect("pump panicked");

        let collected = collected.lock().expect("sink lock poisoned");
        assert!(!collected.is_empty(), "pump never drained");
        assert_eq!(collected.len() % CHANNELS, 0);
        assert!(collected.iter().all(|&s| s == 42));
    }

    #[test]
    fn producer_blocks_until_consumed() {
        let sync = Arc::new(AudioSync::new());
        let big = vec![0i16; BACKLOG_HIGH_WATER + 1024];

        let producer = thread::spawn({
            let sync = Arc::clone(&sync);
            move || {
                // Second produce must block on the high-water mark until
                // the consumer acknowledges.
                sync.produce(&big, &big);
                sync.produce(&[0i16; 16], &[0i16; 16]);
            }
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!producer.is_finished(), "producer ignored backpressure");

        let mut ring = sync.lock();
        ring.set_rates(OUTPUT_RATE, OUTPUT_RATE);
        let mut out = vec![0i16; 2 * BACKLOG_HIGH_WATER];
        ring.read_interleaved(&mut out);
        ring.consume();

        producer.join().expect("producer never unblocked");
    }
}
