pub mod audio;
pub mod image;
pub mod result;
pub mod text;
pub mod video;

use crate::models::LoadError;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Empty text provided")]
    EmptyText,
    #[error("Model error: {0}")]
    Model(#[from] candle_core::Error),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Audio decode error: {0}")]
    AudioDecode(#[from] hound::Error),
    #[error("Image error: {0}")]
    Image(#[from] ::image::ImageError),
    #[error("Video decode error: {0}")]
    Video(#[from] ffmpeg_next::Error),
    #[error("{0}")]
    Load(#[from] LoadError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Rounds to two decimals, the precision the payloads report.
pub(crate) fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Index of the winning class.
pub(crate) fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = i;
        }
    }
    best
}
