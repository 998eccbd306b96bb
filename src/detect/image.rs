use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use image::imageops::FilterType;

use super::result::DetectionResult;
use super::{argmax, round2, DetectError};
use crate::models::hub;

const MODEL_REPO: &str = "prithivMLmods/Deep-Fake-Detector-Model";
const IMAGE_SIZE: u32 = 224;

/// ViT deepfake classifier. Label convention: index 0 = Real, index 1 =
/// Fake. This matches the published model config but is assumed, not
/// verified at runtime; the config's id2label is logged at load time so a
/// polarity mismatch is at least visible.
pub struct ImageDetector {
    model: vit::Model,
    device: Device,
}

impl ImageDetector {
    pub fn load(device: &Device) -> Result<Self, DetectError> {
        let paths = hub::fetch_model_files(MODEL_REPO, &["model.safetensors", "config.json"])?;

        if let Ok(raw) = std::fs::read_to_string(&paths[1]) {
            if let Ok(config) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(labels) = config.get("id2label") {
                    log::info!("Image model label mapping: {}", labels);
                }
            }
        }

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[paths[0].clone()], DType::F32, device)?
        };
        let model = vit::Model::new(&vit::Config::vit_base_patch16_224(), 2, vb)?;

        log::info!("Loaded image model {}", MODEL_REPO);
        Ok(Self {
            model,
            device: device.clone(),
        })
    }

    /// Classifies an image file, returning a structured error result on any
    /// failure rather than propagating it.
    pub fn detect(&self, image_path: &Path) -> DetectionResult {
        match self.run(image_path) {
            Ok(result) => result,
            Err(e) => {
                log::error!("Error in image detection: {}", e);
                DetectionResult::processing_error(e.to_string())
            }
        }
    }

    fn run(&self, image_path: &Path) -> Result<DetectionResult, DetectError> {
        let input = load_image_tensor(image_path, &self.device)?;
        let logits = self.model.forward(&input)?;
        let probs = softmax_last_dim(&logits)?.squeeze(0)?.to_vec1::<f32>()?;

        let winner = argmax(&probs);
        let prediction = if winner == 1 { "Fake" } else { "Real" };

        let mut raw_scores = BTreeMap::new();
        raw_scores.insert("real_score".to_string(), probs[0]);
        raw_scores.insert("fake_score".to_string(), probs[1]);

        Ok(DetectionResult::classified(
            prediction,
            winner == 1,
            round2(probs[winner] * 100.0),
            raw_scores,
        ))
    }
}

/// Opens an image, forces RGB, resizes to 224x224 and normalizes with
/// mean 0.5 / std 0.5 per channel into a (1, 3, 224, 224) tensor.
pub fn load_image_tensor(path: &Path, device: &Device) -> Result<Tensor, DetectError> {
    let img = image::open(path)?.to_rgb8();
    let resized = image::imageops::resize(&img, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);

    let size = IMAGE_SIZE as usize;
    let mut data = Vec::with_capacity(3 * size * size);
    for channel in 0..3 {
        for y in 0..IMAGE_SIZE {
            for x in 0..IMAGE_SIZE {
                let value = resized.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - 0.5) / 0.5);
            }
        }
    }

    Ok(Tensor::from_vec(data, (1, 3, size, size), device)?)
}
