use std::collections::BTreeMap;
use std::fs;

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use tokenizers::{Tokenizer, TruncationParams};

use super::result::DetectionResult;
use super::{argmax, round2, DetectError};
use crate::models::hub;

const MODEL_REPO: &str = "austinb/fraud_text_detection";

/// BERT sequence classifier over {human-written, AI-generated}.
pub struct TextDetector {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl TextDetector {
    pub fn load(device: &Device) -> Result<Self, DetectError> {
        let paths = hub::fetch_model_files(
            MODEL_REPO,
            &["config.json", "tokenizer.json", "model.safetensors"],
        )?;

        let config: BertConfig = serde_json::from_str(&fs::read_to_string(&paths[0])?)
            .map_err(|e| DetectError::Other(format!("invalid model config: {}", e)))?;
        let max_len = config.max_position_embeddings;

        let mut tokenizer = Tokenizer::from_file(&paths[1])
            .map_err(|e| DetectError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_len,
                ..Default::default()
            }))
            .map_err(|e| DetectError::Tokenizer(e.to_string()))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[paths[2].clone()], DTYPE, device)? };
        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let pooler = candle_nn::linear(
            config.hidden_size,
            config.hidden_size,
            vb.pp("bert").pp("pooler").pp("dense"),
        )?;
        let classifier = candle_nn::linear(config.hidden_size, 2, vb.pp("classifier"))?;

        log::info!("Loaded text model {}", MODEL_REPO);
        Ok(Self {
            bert,
            pooler,
            classifier,
            tokenizer,
            device: device.clone(),
            max_len,
        })
    }

    /// Classifies text, re-raising any failure to the caller. Empty or
    /// whitespace-only input is rejected before any model work.
    pub fn detect(&self, text: &str) -> Result<DetectionResult, DetectError> {
        if text.trim().is_empty() {
            return Err(DetectError::EmptyText);
        }

        // Character count as a rough proxy for token count; the tokenizer
        // still truncates exactly at max_len.
        let char_bound = self.max_len * 4;
        let text = truncate_chars(text, char_bound);

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| DetectError::Tokenizer(e.to_string()))?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let attention = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self.bert.forward(&input_ids, &type_ids, Some(&attention))?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?;
        let probs = softmax_last_dim(&logits)?.squeeze(0)?.to_vec1::<f32>()?;

        let winner = argmax(&probs);
        let prediction = if winner == 1 {
            "AI-generated"
        } else {
            "Human-written"
        };

        let mut raw_scores = BTreeMap::new();
        raw_scores.insert("human_score".to_string(), probs[0]);
        raw_scores.insert("ai_score".to_string(), probs[1]);

        Ok(DetectionResult::classified(
            prediction,
            winner == 1,
            round2(probs[winner] * 100.0),
            raw_scores,
        ))
    }
}

/// Cuts `text` down to at most `limit` characters, on a char boundary.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => {
            log::warn!(
                "Text length ({} chars) exceeds maximum. Truncating to {}.",
                text.chars().count(),
                limit
            );
            &text[..byte_idx]
        }
        None => text,
    }
}
