//! Log-power mel spectrograms.
//!
//! The STFT is centered (zero padded by `n_fft / 2` on both ends), uses a
//! periodic Hann window and keeps `n_fft / 2 + 1` power bins per frame. The mel
//! filterbank follows the Slaney scale (linear below 1 kHz, logarithmic above)
//! with area normalization, spanning 0 Hz to Nyquist.

use ndarray::{Array2, Axis};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

const AMIN: f32 = 1e-10;

pub struct MelSpectrogram {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    filterbank: Array2<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl MelSpectrogram {
    pub fn new(sample_rate: u32, n_fft: usize, hop_length: usize, n_mels: usize) -> Self {
        let window = (0..n_fft)
            .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / n_fft as f64).cos()) as f32)
            .collect();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        MelSpectrogram {
            n_fft,
            hop_length,
            window,
            filterbank: mel_filterbank(sample_rate, n_fft, n_mels),
            fft,
        }
    }

    pub fn num_frames(&self, num_samples: usize) -> usize {
        1 + num_samples / self.hop_length
    }

    /// Power spectrogram, `(n_fft / 2 + 1, frames)`.
    pub fn power_spectrogram(&self, samples: &[f32]) -> Array2<f32> {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_bins = self.n_fft / 2 + 1;
        let n_frames = self.num_frames(samples.len());
        let mut power = Array2::<f32>::zeros((n_bins, n_frames));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];

        for (t, mut column) in power.axis_iter_mut(Axis(1)).enumerate() {
            let start = t * self.hop_length;
            let frame = &padded[start..start + self.n_fft];
            buffer
                .iter_mut()
                .zip(frame.iter().zip(&self.window))
                .for_each(|(b, (&s, &w))| *b = Complex::new(s * w, 0.0));

            self.fft.process(&mut buffer);

            column
                .iter_mut()
                .zip(&buffer[..n_bins])
                .for_each(|(p, c)| *p = c.norm_sqr());
        }

        power
    }

    /// Mel power spectrogram, `(n_mels, frames)`.
    pub fn compute(&self, samples: &[f32]) -> Array2<f32> {
        self.filterbank.dot(&self.power_spectrogram(samples))
    }
}

/// Converts power to dB relative to the peak, flooring at `max - top_db`.
pub fn power_to_db(power: &Array2<f32>, top_db: f32) -> Array2<f32> {
    let peak = power.iter().copied().fold(0.0f32, f32::max);
    let reference = 10.0 * peak.max(AMIN).log10();
    let mut db = power.mapv(|p| 10.0 * p.max(AMIN).log10() - reference);
    let floor = db.iter().copied().fold(f32::NEG_INFINITY, f32::max) - top_db;
    db.mapv_inplace(|v| v.max(floor));
    db
}

fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Slaney-normalized triangular filters, `(n_mels, n_fft / 2 + 1)`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;
    let fft_freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * sr / n_fft as f64).collect();

    let mel_max = hz_to_mel(sr / 2.0);
    let mel_freqs: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (left, center, right) = (mel_freqs[m], mel_freqs[m + 1], mel_freqs[m + 2]);
        let enorm = 2.0 / (right - left);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - left) / (center - left);
            let upper = (right - f) / (right - center);
            let w = lower.min(upper).max(0.0);
            weights[[m, k]] = (w * enorm) as f32;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 11025.0] {
            assert_relative_eq!(mel_to_hz(hz_to_mel(hz)), hz, epsilon = 1e-6);
        }
        assert_relative_eq!(hz_to_mel(1000.0), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn filterbank_shape_and_weights() {
        let fb = mel_filterbank(22050, 2048, 128);
        assert_eq!(fb.dim(), (128, 1025));
        assert!(fb.iter().all(|&w| w >= 0.0));
        for row in fb.rows() {
            assert!(row.iter().any(|&w| w > 0.0));
        }
    }

    #[test]
    fn one_second_clip_has_44_frames() {
        let mel = MelSpectrogram::new(22050, 2048, 512, 128);
        let spec = mel.compute(&vec![0.0; 22050]);
        assert_eq!(spec.dim(), (128, 44));
    }

    #[test]
    fn sine_energy_peaks_near_its_bin() {
        let mel = MelSpectrogram::new(22050, 2048, 512, 128);
        let power = mel.power_spectrogram(&sine(1000.0, 22050, 0.5));
        let column = power.column(10);
        let peak_bin = column
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let expected = (1000.0 * 2048.0 / 22050.0f32).round() as usize;
        assert!(peak_bin.abs_diff(expected) <= 1, "peak at {peak_bin}");
    }

    #[test]
    fn db_is_relative_to_peak_and_floored() {
        let power = Array2::from_shape_vec((1, 3), vec![1.0, 0.1, 1e-12]).unwrap();
        let db = power_to_db(&power, 80.0);
        assert_relative_eq!(db[[0, 0]], 0.0, epsilon = 1e-5);
        assert_relative_eq!(db[[0, 1]], -10.0, epsilon = 1e-4);
        assert_relative_eq!(db[[0, 2]], -80.0, epsilon = 1e-4);
    }

    #[test]
    fn silence_maps_to_flat_zero_db() {
        let power = Array2::<f32>::zeros((4, 5));
        let db = power_to_db(&power, 80.0);
        assert!(db.iter().all(|&v| v == 0.0));
    }
}
