use std::sync::Arc;

use candle_core::Device;

use crate::config::AppConfig;
use crate::detect::audio::AudioDetector;
use crate::detect::image::ImageDetector;
use crate::detect::text::TextDetector;
use crate::models::ModelCell;

/// Process-wide service state: the compute device, resolved configuration
/// and one lazy model cell per modality. Owned by the HTTP layer through
/// `web::Data` instead of ambient globals; video shares the image cell.
pub struct AppState {
    pub device: Device,
    pub config: AppConfig,
    pub text: Arc<ModelCell<TextDetector>>,
    pub audio: Arc<ModelCell<AudioDetector>>,
    pub image: Arc<ModelCell<ImageDetector>>,
}

impl AppState {
    pub fn new(device: Device, config: AppConfig) -> Self {
        Self {
            device,
            config,
            text: Arc::new(ModelCell::new()),
            audio: Arc::new(ModelCell::new()),
            image: Arc::new(ModelCell::new()),
        }
    }
}
