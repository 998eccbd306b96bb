use std::fs;
use std::path::{Path, PathBuf};

use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File exceeds the 50MB upload limit")]
    TooLarge,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A multipart `file` part held in memory before it lands on disk.
pub struct UploadedPart {
    pub filename: String,
    pub data: Vec<u8>,
}

/// What a detection endpoint can receive: a direct text field and/or an
/// uploaded file.
#[derive(Default)]
pub struct DetectForm {
    pub text_input: Option<String>,
    pub file: Option<UploadedPart>,
}

/// Drains a multipart payload into a [`DetectForm`], enforcing the upload
/// size ceiling while streaming. Unknown fields are ignored; a malformed
/// stream simply ends the form early, which the handlers report as missing
/// input.
pub async fn read_detect_form(mut payload: Multipart) -> Result<DetectForm, UploadError> {
    let mut form = DetectForm::default();

    while let Ok(Some(mut field)) = payload.try_next().await {
        let name = field.name().unwrap_or("").to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("")
            .to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Dropping malformed multipart field {}: {}", name, e);
                    data.clear();
                    break;
                }
            };
            if data.len() + bytes.len() > MAX_UPLOAD_BYTES {
                return Err(UploadError::TooLarge);
            }
            data.extend_from_slice(&bytes);
        }

        match name.as_str() {
            "text_input" => form.text_input = Some(String::from_utf8_lossy(&data).into_owned()),
            "file" => form.file = Some(UploadedPart { filename, data }),
            _ => {}
        }
    }

    Ok(form)
}

/// An uploaded file written under `<upload_root>/<modality>/`, deleted when
/// the guard drops — on every exit path. Deletion failure is logged and
/// swallowed.
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn save(
        upload_root: &Path,
        modality: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<Self, UploadError> {
        let name = sanitize_filename(filename);
        let path = upload_root
            .join(modality)
            .join(format!("{}_{}", Uuid::new_v4(), name));
        fs::write(&path, data)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove upload {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Reduces a client-supplied filename to its final path component.
fn sanitize_filename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("upload")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_is_deleted_on_drop() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("audio")).unwrap();

        let saved_path = {
            let upload = TempUpload::save(root.path(), "audio", "clip.wav", b"RIFF").unwrap();
            assert!(upload.path().exists());
            upload.path().to_path_buf()
        };
        assert!(!saved_path.exists());
    }

    #[test]
    fn double_deletion_is_quiet() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("image")).unwrap();

        let upload = TempUpload::save(root.path(), "image", "a.png", b"x").unwrap();
        fs::remove_file(upload.path()).unwrap();
        // Drop must not panic on the already-missing file.
    }

    #[test]
    fn filenames_are_reduced_to_basename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("clip.wav"), "clip.wav");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
    }

    #[test]
    fn saved_name_keeps_extension() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("video")).unwrap();

        let upload = TempUpload::save(root.path(), "video", "movie.mp4", b"data").unwrap();
        let name = upload.path().file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_movie.mp4"));
    }
}
