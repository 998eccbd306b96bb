use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder, VarMap};
use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::result::DetectionResult;
use super::{argmax, round2, DetectError};

const TARGET_SAMPLE_RATE: u32 = 16_000;
const MAX_SECONDS: usize = 5;
const N_FFT: usize = 512;
const HOP: usize = 256;
const SPEC_SIZE: usize = 64;

/// Anti-spoofing classifier over {genuine, spoofed}: two conv+pool stages
/// and two fully connected layers over a 64x64 magnitude spectrogram.
///
/// When no pretrained checkpoint is present the network runs with freshly
/// initialized weights; that path exists so the pipeline stays exercisable,
/// but its predictions carry no real signal.
pub struct AudioDetector {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    device: Device,
}

impl AudioDetector {
    pub fn load(device: &Device, models_dir: &Path) -> Result<Self, DetectError> {
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(1, 32, 3, conv_cfg, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(32, 64, 3, conv_cfg, vb.pp("conv2"))?;
        // Two 2x pools take the 64x64 map down to 16x16.
        let fc1 = candle_nn::linear(64 * 16 * 16, 512, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(512, 2, vb.pp("fc2"))?;

        let checkpoint = models_dir.join("aasist").join("model.safetensors");
        if checkpoint.exists() {
            varmap.load(&checkpoint)?;
            log::info!("Loaded audio model weights from {}", checkpoint.display());
        } else {
            log::warn!(
                "No audio checkpoint at {}; running with freshly initialized weights \
                 (predictions are not meaningful)",
                checkpoint.display()
            );
        }

        Ok(Self {
            conv1,
            conv2,
            fc1,
            fc2,
            device: device.clone(),
        })
    }

    fn forward(&self, spectrogram: &Tensor) -> Result<Tensor, candle_core::Error> {
        let xs = self.conv1.forward(spectrogram)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;
        let xs = xs.flatten_from(1)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        self.fc2.forward(&xs)
    }

    /// Classifies an audio file, returning a structured error result on any
    /// failure rather than propagating it.
    pub fn detect(&self, audio_path: &Path) -> DetectionResult {
        match self.run(audio_path) {
            Ok(result) => result,
            Err(e) => {
                log::error!("Error in audio detection: {}", e);
                DetectionResult::processing_error(e.to_string())
            }
        }
    }

    fn run(&self, audio_path: &Path) -> Result<DetectionResult, DetectError> {
        let samples = preprocess_audio(audio_path)?;
        let spec = spectrogram(&samples);
        let spec = resize_bilinear(&spec, SPEC_SIZE, SPEC_SIZE);

        let (rows, cols) = spec.dim();
        let input = Tensor::from_vec(
            spec.into_raw_vec_and_offset().0,
            (1, 1, rows, cols),
            &self.device,
        )?;

        let logits = self.forward(&input)?;
        let probs = softmax_last_dim(&logits)?.squeeze(0)?.to_vec1::<f32>()?;

        let winner = argmax(&probs);
        let prediction = if winner == 1 { "Spoofed/Fake" } else { "Genuine" };

        let mut raw_scores = BTreeMap::new();
        raw_scores.insert("genuine_score".to_string(), probs[0]);
        raw_scores.insert("spoofed_score".to_string(), probs[1]);

        Ok(DetectionResult::classified(
            prediction,
            winner == 1,
            round2(probs[winner] * 100.0),
            raw_scores,
        ))
    }
}

/// Decodes a WAV file to mono f32 samples at 16 kHz, peak-normalized.
fn preprocess_audio(path: &Path) -> Result<Vec<f32>, DetectError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    if samples.is_empty() {
        return Err(DetectError::Other("audio file contains no samples".into()));
    }

    let mono = downmix(&samples, channels);
    let resampled = resample_linear(&mono, spec.sample_rate, TARGET_SAMPLE_RATE);
    Ok(peak_normalize(resampled))
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(input.len() - 1)];
            let b = input[(idx + 1).min(input.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

fn peak_normalize(mut samples: Vec<f32>) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in &mut samples {
            *s /= peak;
        }
    }
    samples
}

/// Magnitude STFT (Hann window 512, hop 256) over at most the first five
/// seconds, frequency bins by frames.
fn spectrogram(samples: &[f32]) -> Array2<f32> {
    let take = samples.len().min(TARGET_SAMPLE_RATE as usize * MAX_SECONDS);
    let mut clip = samples[..take].to_vec();
    if clip.len() < N_FFT {
        clip.resize(N_FFT, 0.0);
    }

    let hann: Vec<f32> = (0..N_FFT)
        .map(|i| (PI * i as f32 / N_FFT as f32).sin().powi(2))
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);

    let n_frames = (clip.len() - N_FFT) / HOP + 1;
    let n_bins = N_FFT / 2 + 1;
    let mut magnitude = Array2::zeros((n_bins, n_frames));
    let mut buffer = vec![Complex::new(0.0f32, 0.0); N_FFT];

    for frame in 0..n_frames {
        let start = frame * HOP;
        for i in 0..N_FFT {
            buffer[i] = Complex::new(clip[start + i] * hann[i], 0.0);
        }
        fft.process(&mut buffer);
        for bin in 0..n_bins {
            magnitude[(bin, frame)] = buffer[bin].norm();
        }
    }

    magnitude
}

/// Bilinear resize with half-pixel centers, matching the usual
/// align_corners=false interpolation.
fn resize_bilinear(src: &Array2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    let scale_y = src_h as f32 / out_h as f32;
    let scale_x = src_w as f32 / out_w as f32;

    let mut out = Array2::zeros((out_h, out_w));
    for y in 0..out_h {
        let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let wy = fy - y0 as f32;
        for x in 0..out_w {
            let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let wx = fx - x0 as f32;

            let top = src[(y0, x0)] * (1.0 - wx) + src[(y0, x1)] * wx;
            let bottom = src[(y1, x0)] * (1.0 - wx) + src[(y1, x1)] * wx;
            out[(y, x)] = top * (1.0 - wy) + bottom * wy;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0, 3.0, -2.0, 2.0];
        let mono = downmix(&stereo, 2);
        assert_eq!(mono, vec![2.0, 0.0]);
    }

    #[test]
    fn resample_halves_sample_count() {
        let input: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 500);
        // Linear interpolation of a ramp stays on the ramp.
        assert!((out[100] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.5, -0.5, 0.25];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn peak_normalize_bounds_samples() {
        let out = peak_normalize(vec![0.5, -2.0, 1.0]);
        assert_eq!(out[1], -1.0);
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn peak_normalize_handles_silence() {
        let out = peak_normalize(vec![0.0, 0.0]);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn spectrogram_has_expected_bins() {
        let samples: Vec<f32> = (0..TARGET_SAMPLE_RATE as usize)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / TARGET_SAMPLE_RATE as f32).sin())
            .collect();
        let spec = spectrogram(&samples);
        assert_eq!(spec.dim().0, N_FFT / 2 + 1);
        assert!(spec.dim().1 > 0);
    }

    #[test]
    fn short_clip_still_yields_one_frame() {
        let spec = spectrogram(&[0.1; 100]);
        assert_eq!(spec.dim(), (N_FFT / 2 + 1, 1));
    }

    #[test]
    fn resize_produces_fixed_map() {
        let src = Array2::from_shape_fn((257, 313), |(y, x)| (y + x) as f32);
        let out = resize_bilinear(&src, SPEC_SIZE, SPEC_SIZE);
        assert_eq!(out.dim(), (SPEC_SIZE, SPEC_SIZE));
        // Values interpolate within the source range.
        let max_src = (257 + 313 - 2) as f32;
        assert!(out.iter().all(|&v| v >= 0.0 && v <= max_src));
    }

    #[test]
    fn untrained_model_probabilities_sum_to_one() {
        let device = Device::Cpu;
        let detector =
            AudioDetector::load(&device, Path::new("/nonexistent-models-dir")).unwrap();
        let input = Tensor::zeros((1, 1, SPEC_SIZE, SPEC_SIZE), DType::F32, &device).unwrap();
        let logits = detector.forward(&input).unwrap();
        let probs = softmax_last_dim(&logits)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(probs.len(), 2);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
