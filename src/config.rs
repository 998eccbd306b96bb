use std::env;
use std::path::PathBuf;

/// Runtime settings resolved once at startup from the environment
/// (with `.env` support via dotenv).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upload_root: PathBuf,
    pub models_dir: PathBuf,
    pub frame_interval_secs: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8081);

        let upload_root = env::var("UPLOAD_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));

        let models_dir = env::var("MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        let frame_interval_secs = env::var("VIDEO_FRAME_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        Self {
            port,
            upload_root,
            models_dir,
            frame_interval_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        let config = AppConfig::from_env();
        assert!(config.frame_interval_secs > 0);
        assert!(config.port > 0);
    }
}
