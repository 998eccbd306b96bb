use std::path::PathBuf;

use hf_hub::api::sync::Api;
use hf_hub::Repo;

use super::LoadError;

/// Downloads the named files from a Hugging Face model repo, returning the
/// local cache paths in the same order. Files already present in the hub
/// cache are not re-downloaded.
pub fn fetch_model_files(repo_id: &str, files: &[&str]) -> Result<Vec<PathBuf>, LoadError> {
    let api = Api::new()
        .map_err(|e| LoadError::Failed(format!("Hugging Face API init failed: {}", e)))?;
    let repo = api.repo(Repo::model(repo_id.to_string()));

    files
        .iter()
        .map(|file| {
            log::info!("Fetching {} from {}", file, repo_id);
            repo.get(file).map_err(|e| {
                LoadError::Failed(format!("failed to fetch {} from {}: {}", file, repo_id, e))
            })
        })
        .collect()
}
