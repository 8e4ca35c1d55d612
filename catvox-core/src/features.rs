//! MFCC feature extraction with a fixed output shape.

use crate::audio;
use crate::error::{AudioError, FeatureError, Result};
use crate::types::AudioFormat;
use ndarray::{Array2, ArrayView2, s};
use rustfft::{FftPlanner, num_complex::Complex};
use std::f32::consts::PI;
use std::path::Path;

/// Number of cepstral coefficients per frame.
pub const N_MFCC: usize = 40;

/// Number of time frames after padding or truncation.
pub const MAX_FRAMES: usize = 130;

/// Cepstral coefficient matrix with the classifier's fixed shape.
///
/// Always exactly [`N_MFCC`] rows by [`MAX_FRAMES`] columns.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrix(Array2<f32>);

impl FeatureMatrix {
    /// Shape every matrix has.
    pub const SHAPE: (usize, usize) = (N_MFCC, MAX_FRAMES);

    /// Wrap an array, checking the fixed shape and finiteness.
    pub fn new(array: Array2<f32>) -> std::result::Result<Self, FeatureError> {
        if array.dim() != Self::SHAPE {
            return Err(FeatureError::InvalidShape {
                expected: Self::SHAPE,
                got: array.dim(),
            });
        }

        if array.iter().any(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite);
        }

        Ok(Self(array))
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.0.view()
    }
}

/// MFCC extractor configuration.
#[derive(Clone, Debug)]
pub struct MfccConfig {
    pub n_mfcc: usize,
    pub max_frames: usize,
    pub n_mels: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Dynamic range kept by the dB conversion.
    pub top_db: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_mfcc: N_MFCC,
            max_frames: MAX_FRAMES,
            n_mels: 128,
            n_fft: 2048,
            hop_length: 512,
            top_db: 80.0,
        }
    }
}

/// Turns audio files into [`FeatureMatrix`] values.
#[derive(Clone, Debug, Default)]
pub struct FeatureExtractor {
    config: MfccConfig,
}

impl FeatureExtractor {
    /// Extract a fixed-shape feature matrix from an audio file on disk.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file is missing or empty
    /// - A WAV file fails header validation
    /// - Both decode attempts fail, or decoding yields no samples
    pub fn extract(&self, path: &Path, format: AudioFormat) -> Result<FeatureMatrix> {
        tracing::info!(path = %path.display(), "extracting mfcc");

        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return Err(AudioError::NotFound(path.display().to_string()).into()),
        };
        if size == 0 {
            return Err(AudioError::EmptyFile(path.display().to_string()).into());
        }

        tracing::debug!(size, "file size");

        if format == AudioFormat::Wav && !audio::is_valid_audio(path, format) {
            return Err(AudioError::InvalidWav(path.display().to_string()).into());
        }

        let mut decoded = audio::decode(path, format)?;

        tracing::info!(
            duration = format!("{:.2}s", decoded.duration_secs()),
            sample_rate = decoded.sample_rate,
            "audio loaded"
        );

        if decoded.samples.is_empty() {
            return Err(AudioError::NoSamples.into());
        }

        audio::peak_normalize(&mut decoded.samples);

        let mfcc = self.mfcc(&decoded.samples, decoded.sample_rate);
        tracing::debug!(shape = ?mfcc.dim(), "mfcc before padding");

        let fitted = fit_frames(mfcc, self.config.max_frames);
        tracing::debug!(shape = ?fitted.dim(), "final mfcc shape");

        Ok(FeatureMatrix::new(fitted)?)
    }

    /// Compute the MFCC matrix (n_mfcc, frames) for mono samples.
    pub fn mfcc(&self, samples: &[f32], sample_rate: u32) -> Array2<f32> {
        let config = &self.config;

        let power = stft_power(samples, config.n_fft, config.hop_length);
        let filterbank = mel_filterbank(config.n_fft, config.n_mels, sample_rate as f32);
        let mel = filterbank.dot(&power);
        let log_mel = power_to_db(mel, config.top_db);

        let dct = dct_matrix(config.n_mfcc, config.n_mels);
        dct.dot(&log_mel)
    }
}

/// Pad with zeros on the right, or truncate, to exactly `max_frames` columns.
pub fn fit_frames(features: Array2<f32>, max_frames: usize) -> Array2<f32> {
    let (rows, frames) = features.dim();

    if frames == max_frames {
        return features;
    }

    if frames > max_frames {
        return features.slice(s![.., ..max_frames]).to_owned();
    }

    let mut padded = Array2::<f32>::zeros((rows, max_frames));
    padded.slice_mut(s![.., ..frames]).assign(&features);
    padded
}

/// Periodic Hann window for spectral analysis.
fn hann_window(window_length: usize) -> Vec<f32> {
    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / window_length as f32).cos())
        .collect()
}

/// Centered STFT power spectrogram (freq_bins, frames).
///
/// The signal is zero-padded by `n_fft / 2` on both sides so frame `t` is
/// centered on sample `t * hop_length`.
fn stft_power(audio: &[f32], n_fft: usize, hop_length: usize) -> Array2<f32> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0_f32; audio.len() + 2 * pad];
    padded[pad..pad + audio.len()].copy_from_slice(audio);

    let window = hann_window(n_fft);
    let num_frames = 1 + (padded.len() - n_fft) / hop_length;
    let freq_bins = n_fft / 2 + 1;
    let mut spectrogram = Array2::<f32>::zeros((freq_bins, num_frames));

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut frame: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n_fft];

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_length;

        for (i, slot) in frame.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * window[i], 0.0);
        }

        fft.process(&mut frame);

        for k in 0..freq_bins {
            spectrogram[[k, frame_idx]] = frame[k].norm_sqr();
        }
    }

    spectrogram
}

const MEL_F_SP: f32 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f32 = 1000.0;
const MEL_MIN_LOG_MEL: f32 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f32 {
    6.4_f32.ln() / 27.0
}

/// Convert frequency in Hz to the Slaney mel scale.
///
/// Linear below 1 kHz, logarithmic above.
fn hz_to_mel(freq: f32) -> f32 {
    if freq >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (freq / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        freq / MEL_F_SP
    }
}

/// Convert Slaney mel scale to frequency in Hz.
fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        MEL_F_SP * mel
    }
}

/// Area-normalized triangular mel filterbank (n_mels, freq_bins).
fn mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: f32) -> Array2<f32> {
    let freq_bins = n_fft / 2 + 1;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate / 2.0);

    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let fft_freqs: Vec<f32> = (0..freq_bins)
        .map(|i| i as f32 * sample_rate / n_fft as f32)
        .collect();

    for mel_idx in 0..n_mels {
        let left = mel_points[mel_idx];
        let center = mel_points[mel_idx + 1];
        let right = mel_points[mel_idx + 2];
        let norm = 2.0 / (right - left);

        for (freq_idx, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            let weight = lower.min(upper).max(0.0);
            filterbank[[mel_idx, freq_idx]] = weight * norm;
        }
    }

    filterbank
}

/// Power to decibels, clamped to `top_db` below the peak.
fn power_to_db(power: Array2<f32>, top_db: f32) -> Array2<f32> {
    const AMIN: f32 = 1e-10;

    let db = power.mapv(|x| 10.0 * x.max(AMIN).log10());
    let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - top_db;

    db.mapv(|x| x.max(floor))
}

/// Orthonormal DCT-II basis, truncated to the first `n_out` rows.
fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f32;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 {
            (1.0 / n).sqrt()
        } else {
            (2.0 / n).sqrt()
        };
        scale * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos()
    })
}
