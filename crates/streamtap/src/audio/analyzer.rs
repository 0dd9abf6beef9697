//! Spectrum analyzer
//!
//! `SpectrumAnalyzer` mixes incoming PCM down to mono, stitches it into
//! fixed-size windows, runs a forward FFT over each window and routes every
//! bin magnitude through its own `MovingAverage`. The smoothed magnitudes
//! are handed to a weakly-held `SpectrumObserver`.
//!
//! Everything the per-buffer path touches is allocated in `new`, so
//! `process` can run on a real-time audio thread.

use std::sync::{Arc, Mutex, Weak};

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Deserialize;

use crate::config::analysis::{DEFAULT_SMOOTHING_LENGTH, DEFAULT_WINDOW_SIZE};
use crate::error::{Result, TapError};

use super::smoother::MovingAverage;
use super::types::{AudioFormat, ChannelLayout, PcmBuffer, TapDescriptor};

/// Taper applied to each window before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hann,
    Rectangular,
}

impl WindowFunction {
    fn coefficients(self, size: usize) -> Vec<f32> {
        match self {
            WindowFunction::Hann => (0..size)
                .map(|i| {
                    0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos())
                })
                .collect(),
            WindowFunction::Rectangular => vec![1.0; size],
        }
    }
}

/// Analyzer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Frames per transform window; must be a power of two
    pub window_size: usize,
    /// Windows averaged per bin
    pub smoothing_length: usize,
    pub window: WindowFunction,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            smoothing_length: DEFAULT_SMOOTHING_LENGTH,
            window: WindowFunction::Hann,
        }
    }
}

/// Receives one smoothed magnitude buffer per analysed window.
///
/// Called synchronously from `SpectrumAnalyzer::process`, possibly on a
/// real-time audio thread. The slice is only valid for the call.
pub trait SpectrumObserver: Send + Sync {
    fn frequency_data(&self, magnitudes: &[f32]);
}

/// Converts time-domain PCM into smoothed frequency-domain snapshots
pub struct SpectrumAnalyzer {
    format: AudioFormat,
    window_size: usize,
    fft: Arc<dyn Fft<f32>>,
    coefficients: Vec<f32>,
    pending: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothers: Vec<MovingAverage>,
    output: Vec<f32>,
    observer: Option<Weak<dyn SpectrumObserver>>,
    windows_processed: u64,
}

impl SpectrumAnalyzer {
    /// Create an analyzer for tracks of the given format.
    ///
    /// Fails with `InvalidArgument` if the window size is not a power of two
    /// (or is smaller than 2), the smoothing length is zero, or the format
    /// is malformed.
    pub fn new(format: AudioFormat, config: AnalyzerConfig) -> Result<Self> {
        format.validate()?;
        let window_size = config.window_size;
        if window_size < 2 || !window_size.is_power_of_two() {
            return Err(TapError::InvalidArgument(format!(
                "window size {} is not a power of two >= 2",
                window_size
            )));
        }

        let bins = window_size / 2;
        let smoothers = (0..bins)
            .map(|_| MovingAverage::new(config.smoothing_length))
            .collect::<Result<Vec<_>>>()?;

        let fft = FftPlanner::<f32>::new().plan_fft_forward(window_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        log::debug!(
            "Spectrum analyzer: window={} bins={} smoothing={} window_fn={:?} ({})",
            window_size,
            bins,
            config.smoothing_length,
            config.window,
            format
        );

        Ok(Self {
            format,
            window_size,
            fft,
            coefficients: config.window.coefficients(window_size),
            pending: Vec::with_capacity(window_size),
            spectrum: vec![Complex::new(0.0, 0.0); window_size],
            scratch,
            smoothers,
            output: vec![0.0; bins],
            observer: None,
            windows_processed: 0,
        })
    }

    /// Register the delegate. Held weakly; the caller keeps it alive.
    pub fn set_observer<O: SpectrumObserver + 'static>(&mut self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer);
        self.observer = Some(weak as Weak<dyn SpectrumObserver>);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Re-target the analyzer at a new track.
    ///
    /// Drops any partial window and smoothing history. Processes no audio.
    pub fn prepare_for_track(&mut self, format: &AudioFormat) -> Result<TapDescriptor> {
        format.validate()?;
        self.format = *format;
        self.reset();
        log::debug!("Spectrum analyzer prepared for {}", format);
        Ok(TapDescriptor::with_preferred_frames(*format, self.window_size))
    }

    /// Feed one PCM buffer.
    ///
    /// Uses `min(frame_count, frames present)` frames. Emits one magnitude
    /// buffer per window completed during this call; leftover frames wait
    /// for the next call.
    pub fn process(&mut self, buffer: &PcmBuffer<'_>, frame_count: usize) {
        let channels = self.format.channels as usize;
        let frames = frame_count.min(buffer.frames_available(self.format.channels));
        let plane_len = buffer.len() / channels;
        let scale = 1.0 / channels as f32;

        for frame in 0..frames {
            let mut mixed = 0.0f32;
            for ch in 0..channels {
                let index = match self.format.layout {
                    ChannelLayout::Interleaved => frame * channels + ch,
                    ChannelLayout::Planar => ch * plane_len + frame,
                };
                mixed += buffer.sample(index);
            }
            self.pending.push(mixed * scale);

            if self.pending.len() == self.window_size {
                self.analyze_window();
                self.pending.clear();
            }
        }
    }

    fn analyze_window(&mut self) {
        for ((slot, &sample), &coef) in self
            .spectrum
            .iter_mut()
            .zip(self.pending.iter())
            .zip(self.coefficients.iter())
        {
            *slot = Complex::new(sample * coef, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let norm = 1.0 / self.window_size as f32;
        for ((smoother, out), bin) in self
            .smoothers
            .iter_mut()
            .zip(self.output.iter_mut())
            .zip(self.spectrum.iter())
        {
            smoother.update(bin.norm() * norm);
            *out = smoother.average().unwrap_or(0.0);
        }

        self.windows_processed += 1;

        if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
            observer.frequency_data(&self.output);
        }
    }

    /// Drop the partial window and all smoothing history
    pub fn reset(&mut self) {
        self.pending.clear();
        self.smoothers.iter_mut().for_each(MovingAverage::reset);
        self.output.iter_mut().for_each(|v| *v = 0.0);
        self.windows_processed = 0;
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Magnitudes per emitted buffer (`window_size / 2`)
    pub fn bin_count(&self) -> usize {
        self.output.len()
    }

    /// Centre frequency of bin `k` in Hz for the current format
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.format.sample_rate as f32 / self.window_size as f32
    }

    /// Mono frames waiting for the current window to fill
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Windows analysed since construction or the last reset
    pub fn windows_processed(&self) -> u64 {
        self.windows_processed
    }
}

/// Latest spectrum frame captured by `SharedSpectrum`
#[derive(Debug, Clone, Default)]
pub struct SpectrumFrame {
    pub magnitudes: Vec<f32>,
    /// Number of frames received so far
    pub sequence: u64,
}

/// Delegate that keeps the most recent magnitude buffer for polling consumers.
///
/// Uses `try_lock` on the audio side: if a reader holds the lock the frame
/// is skipped rather than blocking the producer.
#[derive(Debug, Default)]
pub struct SharedSpectrum {
    latest: Mutex<SpectrumFrame>,
}

impl SharedSpectrum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the latest frame
    pub fn snapshot(&self) -> SpectrumFrame {
        self.latest
            .lock()
            .map(|frame| frame.clone())
            .unwrap_or_default()
    }

    /// Zero the stored frame (e.g. after the stream stops)
    pub fn clear(&self) {
        if let Ok(mut frame) = self.latest.lock() {
            frame.magnitudes.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}

impl SpectrumObserver for SharedSpectrum {
    fn frequency_data(&self, magnitudes: &[f32]) {
        if let Ok(mut frame) = self.latest.try_lock() {
            if frame.magnitudes.len() != magnitudes.len() {
                frame.magnitudes.resize(magnitudes.len(), 0.0);
            }
            frame.magnitudes.copy_from_slice(magnitudes);
            frame.sequence += 1;
        }
    }
}

/// Fold linear bins into `bands` display bands on a quadratic frequency scale.
///
/// Each band takes the peak magnitude of the bins it covers, so low
/// frequencies get more bands than a linear split would give them.
pub fn fold_bands(magnitudes: &[f32], bands: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; bands];
    let bins = magnitudes.len();
    if bins == 0 {
        return out;
    }

    for (band, value) in out.iter_mut().enumerate() {
        let low = (band as f32 / bands as f32).powf(2.0);
        let high = ((band + 1) as f32 / bands as f32).powf(2.0);

        let start = ((low * bins as f32) as usize).min(bins - 1);
        let end = ((high * bins as f32) as usize).max(start + 1).min(bins);

        *value = magnitudes[start..end].iter().copied().fold(0.0f32, f32::max);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Delegate that records every buffer it receives
    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Vec<f32>>>,
    }

    impl Recorder {
        fn frames(&self) -> Vec<Vec<f32>> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl SpectrumObserver for Recorder {
        fn frequency_data(&self, magnitudes: &[f32]) {
            self.frames.lock().unwrap().push(magnitudes.to_vec());
        }
    }

    fn config(window_size: usize, smoothing_length: usize) -> AnalyzerConfig {
        AnalyzerConfig {
            window_size,
            smoothing_length,
            window: WindowFunction::Hann,
        }
    }

    fn analyzer_with_recorder(
        format: AudioFormat,
        cfg: AnalyzerConfig,
    ) -> (SpectrumAnalyzer, Arc<Recorder>) {
        let mut analyzer = SpectrumAnalyzer::new(format, cfg).unwrap();
        let recorder = Arc::new(Recorder::default());
        analyzer.set_observer(&recorder);
        (analyzer, recorder)
    }

    /// Deterministic stereo test signal: two sines plus a pseudo-random hiss
    fn stereo_signal(frames: usize) -> Vec<f32> {
        let mut state: u32 = 0x1234_5678;
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
            let t = i as f32 / 44100.0;
            out.push((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 + noise * 0.1);
            out.push((2.0 * std::f32::consts::PI * 3000.0 * t).sin() * 0.3 + noise * 0.1);
        }
        out
    }

    // --- Construction ---

    #[test]
    fn non_power_of_two_window_is_invalid() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        for size in [0, 1, 3, 1000, 1023, 1536] {
            let result = SpectrumAnalyzer::new(format, config(size, 4));
            assert!(
                matches!(result, Err(TapError::InvalidArgument(_))),
                "window {} should be rejected",
                size
            );
        }
    }

    #[test]
    fn power_of_two_windows_are_accepted() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        for size in [2, 64, 512, 1024, 4096] {
            let analyzer = SpectrumAnalyzer::new(format, config(size, 4)).unwrap();
            assert_eq!(analyzer.window_size(), size);
            assert_eq!(analyzer.bin_count(), size / 2);
        }
    }

    #[test]
    fn zero_smoothing_length_is_invalid() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let result = SpectrumAnalyzer::new(format, config(1024, 0));
        assert!(matches!(result, Err(TapError::InvalidArgument(_))));
    }

    #[test]
    fn malformed_format_fails_construction() {
        let result = SpectrumAnalyzer::new(AudioFormat::interleaved_f32(44100, 0), config(1024, 4));
        assert!(matches!(result, Err(TapError::InvalidArgument(_))));
        let result = SpectrumAnalyzer::new(AudioFormat::interleaved_f32(0, 2), config(1024, 4));
        assert!(matches!(result, Err(TapError::InvalidArgument(_))));
    }

    #[test]
    fn default_config() {
        let cfg = AnalyzerConfig::default();
        assert_eq!(cfg.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(cfg.smoothing_length, DEFAULT_SMOOTHING_LENGTH);
        assert_eq!(cfg.window, WindowFunction::Hann);
    }

    // --- Windowing ---

    #[test]
    fn silent_buffer_emits_two_zero_frames() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(1024, 4));

        let silence = vec![0.0f32; 2048];
        analyzer.process(&PcmBuffer::F32(&silence), 2048);

        let frames = recorder.frames();
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame.len(), 512);
            assert!(frame.iter().all(|&m| m == 0.0));
        }
        assert!(analyzer.smoothers.iter().all(|s| s.average() == Some(0.0)));
    }

    #[test]
    fn emits_floor_of_frames_over_window() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(512, 2));

        let signal = stereo_signal(5000);
        analyzer.process(&PcmBuffer::F32(&signal), 5000);

        assert_eq!(recorder.frames().len(), 5000 / 512);
        assert_eq!(analyzer.windows_processed(), 9);
        assert_eq!(analyzer.pending_frames(), 5000 % 512);
    }

    #[test]
    fn short_buffer_is_held_not_analysed() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(1024, 4));

        let samples = vec![0.5f32; 1000];
        analyzer.process(&PcmBuffer::F32(&samples), 1000);

        assert!(recorder.frames().is_empty());
        assert_eq!(analyzer.pending_frames(), 1000);
    }

    #[test]
    fn several_windows_in_one_call() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(256, 1));

        let signal = stereo_signal(256 * 3);
        analyzer.process(&PcmBuffer::F32(&signal), 256 * 3);
        assert_eq!(recorder.frames().len(), 3);
        assert_eq!(analyzer.pending_frames(), 0);
    }

    #[test]
    fn output_is_chunk_invariant() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let total = 4096 + 300;
        let signal = stereo_signal(total);

        let (mut whole, whole_rec) = analyzer_with_recorder(format, config(512, 3));
        whole.process(&PcmBuffer::F32(&signal), total);

        let (mut chunked, chunked_rec) = analyzer_with_recorder(format, config(512, 3));
        let sizes = [1, 7, 512, 300, 64, 1000, 13, 511, 2];
        let mut offset = 0;
        let mut i = 0;
        while offset < total {
            let frames = sizes[i % sizes.len()].min(total - offset);
            let chunk = &signal[offset * 2..(offset + frames) * 2];
            chunked.process(&PcmBuffer::F32(chunk), frames);
            offset += frames;
            i += 1;
        }

        let a = whole_rec.frames();
        let b = chunked_rec.frames();
        assert_eq!(a.len(), total / 512);
        assert_eq!(a, b);
    }

    #[test]
    fn split_512_512_matches_single_1024() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let signal = stereo_signal(1024);

        let (mut one, one_rec) = analyzer_with_recorder(format, config(512, 4));
        one.process(&PcmBuffer::F32(&signal), 1024);

        let (mut two, two_rec) = analyzer_with_recorder(format, config(512, 4));
        two.process(&PcmBuffer::F32(&signal[..1024]), 512);
        two.process(&PcmBuffer::F32(&signal[1024..]), 512);

        assert_eq!(one_rec.frames(), two_rec.frames());
    }

    // --- Truncation ---

    #[test]
    fn frame_count_beyond_buffer_is_truncated() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(256, 1));

        let signal = stereo_signal(300);
        analyzer.process(&PcmBuffer::F32(&signal), 10_000);
        assert_eq!(recorder.frames().len(), 1);
        assert_eq!(analyzer.pending_frames(), 300 - 256);
    }

    #[test]
    fn frame_count_below_buffer_limits_consumption() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut analyzer, _recorder) = analyzer_with_recorder(format, config(256, 1));

        let signal = stereo_signal(300);
        analyzer.process(&PcmBuffer::F32(&signal), 100);
        assert_eq!(analyzer.pending_frames(), 100);
    }

    #[test]
    fn trailing_partial_frame_is_ignored() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut analyzer, _recorder) = analyzer_with_recorder(format, config(256, 1));

        let samples = vec![0.1f32; 11];
        analyzer.process(&PcmBuffer::F32(&samples), 6);
        assert_eq!(analyzer.pending_frames(), 5);
    }

    #[test]
    fn empty_buffer_is_harmless() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(256, 1));
        analyzer.process(&PcmBuffer::F32(&[]), 0);
        analyzer.process(&PcmBuffer::F32(&[]), 512);
        assert!(recorder.frames().is_empty());
        assert_eq!(analyzer.pending_frames(), 0);
    }

    // --- Spectral content ---

    #[test]
    fn sine_peaks_at_expected_bin() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(1024, 1));

        let bin = 32;
        let freq = analyzer.bin_frequency(bin);
        let samples: Vec<f32> = (0..1024)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
            .collect();
        analyzer.process(&PcmBuffer::F32(&samples), 1024);

        let frame = &recorder.frames()[0];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
        assert!(frame.iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn bin_frequency_spacing() {
        let format = AudioFormat::interleaved_f32(48000, 2);
        let analyzer = SpectrumAnalyzer::new(format, config(1024, 1)).unwrap();
        assert_eq!(analyzer.bin_frequency(0), 0.0);
        assert_eq!(analyzer.bin_frequency(1), 46.875);
        assert_eq!(analyzer.bin_frequency(512), 24000.0);
    }

    #[test]
    fn smoothing_averages_across_windows() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let cfg = AnalyzerConfig {
            window_size: 64,
            smoothing_length: 2,
            window: WindowFunction::Rectangular,
        };
        let (mut analyzer, recorder) = analyzer_with_recorder(format, cfg);

        // DC level 1.0 then silence: bin 0 is 1.0, then the mean of 1.0 and 0.0
        let ones = vec![1.0f32; 64];
        let zeros = vec![0.0f32; 64];
        analyzer.process(&PcmBuffer::F32(&ones), 64);
        analyzer.process(&PcmBuffer::F32(&zeros), 64);
        analyzer.process(&PcmBuffer::F32(&zeros), 64);

        let frames = recorder.frames();
        assert_eq!(frames.len(), 3);
        assert!((frames[0][0] - 1.0).abs() < 1e-6);
        assert!((frames[1][0] - 0.5).abs() < 1e-6);
        assert!(frames[2][0].abs() < 1e-6);
    }

    // --- Channel handling ---

    #[test]
    fn planar_matches_interleaved() {
        let frames = 1024;
        let interleaved = stereo_signal(frames);
        let mut planar = Vec::with_capacity(frames * 2);
        planar.extend(interleaved.iter().step_by(2));
        planar.extend(interleaved.iter().skip(1).step_by(2));

        let format = AudioFormat::interleaved_f32(44100, 2);
        let (mut a, a_rec) = analyzer_with_recorder(format, config(512, 2));
        a.process(&PcmBuffer::F32(&interleaved), frames);

        let (mut b, b_rec) =
            analyzer_with_recorder(format.with_layout(ChannelLayout::Planar), config(512, 2));
        b.process(&PcmBuffer::F32(&planar), frames);

        assert_eq!(a_rec.frames(), b_rec.frames());
    }

    #[test]
    fn i16_input_matches_f32_input() {
        let frames = 512;
        let floats: Vec<f32> = stereo_signal(frames)
            .iter()
            .map(|s| (s * 32767.0).round() / 32768.0)
            .collect();
        let ints: Vec<i16> = floats.iter().map(|s| (s * 32768.0) as i16).collect();

        let (mut a, a_rec) =
            analyzer_with_recorder(AudioFormat::interleaved_f32(44100, 2), config(512, 1));
        a.process(&PcmBuffer::F32(&floats), frames);

        let (mut b, b_rec) =
            analyzer_with_recorder(AudioFormat::interleaved_i16(44100, 2), config(512, 1));
        b.process(&PcmBuffer::I16(&ints), frames);

        let fa = &a_rec.frames()[0];
        let fb = &b_rec.frames()[0];
        for (x, y) in fa.iter().zip(fb.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    // --- Observer ---

    #[test]
    fn dropped_observer_is_skipped() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(64, 1));
        drop(recorder);

        let samples = vec![0.25f32; 256];
        analyzer.process(&PcmBuffer::F32(&samples), 256);
        assert_eq!(analyzer.windows_processed(), 4);
    }

    #[test]
    fn no_observer_still_analyses() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let mut analyzer = SpectrumAnalyzer::new(format, config(64, 1)).unwrap();
        let samples = vec![1.0f32; 64];
        analyzer.process(&PcmBuffer::F32(&samples), 64);
        assert_eq!(analyzer.windows_processed(), 1);
        assert!(analyzer.output[0] > 0.0);
    }

    #[test]
    fn clear_observer_stops_delivery() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let (mut analyzer, recorder) = analyzer_with_recorder(format, config(64, 1));
        analyzer.clear_observer();
        analyzer.process(&PcmBuffer::F32(&[0.0; 64]), 64);
        assert!(recorder.frames().is_empty());
    }

    // --- prepare_for_track ---

    #[test]
    fn prepare_for_track_retargets_and_resets() {
        let (mut analyzer, _recorder) =
            analyzer_with_recorder(AudioFormat::interleaved_f32(44100, 2), config(512, 2));
        let signal = stereo_signal(700);
        analyzer.process(&PcmBuffer::F32(&signal), 700);
        assert_eq!(analyzer.pending_frames(), 188);

        let mono = AudioFormat::interleaved_i16(22050, 1);
        let descriptor = analyzer.prepare_for_track(&mono).unwrap();
        assert_eq!(descriptor.format(), &mono);
        assert_eq!(descriptor.preferred_frames(), Some(512));
        assert_eq!(analyzer.format(), &mono);
        assert_eq!(analyzer.pending_frames(), 0);
        assert_eq!(analyzer.windows_processed(), 0);
        assert!(analyzer.smoothers.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn prepare_for_track_rejects_malformed_format() {
        let format = AudioFormat::interleaved_f32(44100, 2);
        let mut analyzer = SpectrumAnalyzer::new(format, config(512, 2)).unwrap();
        let result = analyzer.prepare_for_track(&AudioFormat::interleaved_f32(44100, 0));
        assert!(matches!(result, Err(TapError::InvalidArgument(_))));
        assert_eq!(analyzer.format(), &format);
    }

    // --- SharedSpectrum ---

    #[test]
    fn shared_spectrum_keeps_latest() {
        let shared = SharedSpectrum::new();
        assert!(shared.snapshot().magnitudes.is_empty());

        shared.frequency_data(&[1.0, 2.0]);
        shared.frequency_data(&[3.0, 4.0]);
        let frame = shared.snapshot();
        assert_eq!(frame.magnitudes, vec![3.0, 4.0]);
        assert_eq!(frame.sequence, 2);

        shared.clear();
        assert_eq!(shared.snapshot().magnitudes, vec![0.0, 0.0]);
    }

    #[test]
    fn shared_spectrum_as_analyzer_delegate() {
        let format = AudioFormat::interleaved_f32(44100, 1);
        let mut analyzer = SpectrumAnalyzer::new(format, config(128, 1)).unwrap();
        let shared = Arc::new(SharedSpectrum::new());
        analyzer.set_observer(&shared);

        analyzer.process(&PcmBuffer::F32(&[0.5; 256]), 256);
        let frame = shared.snapshot();
        assert_eq!(frame.magnitudes.len(), 64);
        assert_eq!(frame.sequence, 2);
    }

    // --- fold_bands ---

    #[test]
    fn fold_bands_length_and_peak() {
        let mut magnitudes = vec![0.0f32; 512];
        magnitudes[0] = 0.9;
        magnitudes[511] = 0.4;
        let bands = fold_bands(&magnitudes, 16);
        assert_eq!(bands.len(), 16);
        assert_eq!(bands[0], 0.9);
        assert_eq!(bands[15], 0.4);
    }

    #[test]
    fn fold_bands_empty_input() {
        assert_eq!(fold_bands(&[], 4), vec![0.0; 4]);
    }

    #[test]
    fn fold_bands_more_bands_than_bins() {
        let bands = fold_bands(&[0.5, 0.25], 8);
        assert_eq!(bands.len(), 8);
        assert!(bands.iter().all(|&b| b == 0.5 || b == 0.25));
    }
}
