use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use log::error;
use serde::Serialize;
use serde_json::json;

use crate::detect::audio::AudioDetector;
use crate::detect::image::ImageDetector;
use crate::detect::result::DetectionResult;
use crate::detect::text::TextDetector;
use crate::detect::{video, DetectError};
use crate::models::LoadError;
use crate::state::AppState;
use crate::upload::{read_detect_form, TempUpload, UploadError, UploadedPart};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/detect/text").route(web::post().to(detect_text)))
        .service(web::resource("/detect/audio").route(web::post().to(detect_audio)))
        .service(web::resource("/detect/image").route(web::post().to(detect_image)))
        .service(web::resource("/detect/video").route(web::post().to(detect_video)));
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.to_string(),
    })
}

fn internal_error(message: String) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse { error: message })
}

fn upload_error_response(e: UploadError) -> HttpResponse {
    match e {
        UploadError::TooLarge => bad_request(&e.to_string()),
        UploadError::Io(_) => internal_error(e.to_string()),
    }
}

/// Rejects absent or empty file parts before anything touches a model.
fn validate_file_part(file: &UploadedPart) -> Result<(), HttpResponse> {
    if file.filename.is_empty() {
        return Err(bad_request("No file selected"));
    }
    if file.data.is_empty() {
        return Err(bad_request("The uploaded file is empty"));
    }
    Ok(())
}

async fn text_detector(state: &web::Data<AppState>) -> Result<Arc<TextDetector>, LoadError> {
    let device = state.device.clone();
    state
        .text
        .get_or_load(move || {
            TextDetector::load(&device).map_err(|e| LoadError::Failed(e.to_string()))
        })
        .await
}

async fn audio_detector(state: &web::Data<AppState>) -> Result<Arc<AudioDetector>, LoadError> {
    let device = state.device.clone();
    let models_dir = state.config.models_dir.clone();
    state
        .audio
        .get_or_load(move || {
            AudioDetector::load(&device, &models_dir).map_err(|e| LoadError::Failed(e.to_string()))
        })
        .await
}

async fn image_detector(state: &web::Data<AppState>) -> Result<Arc<ImageDetector>, LoadError> {
    let device = state.device.clone();
    state
        .image
        .get_or_load(move || {
            ImageDetector::load(&device).map_err(|e| LoadError::Failed(e.to_string()))
        })
        .await
}

async fn detect_text(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    // Short-circuit instead of queuing behind an in-flight load.
    if state.text.is_loading() {
        return HttpResponse::ServiceUnavailable().json(json!({
            "error": "Model is currently loading. Please wait a moment and try again.",
            "status": "loading"
        }));
    }

    let form = match read_detect_form(payload).await {
        Ok(form) => form,
        Err(e) => return upload_error_response(e),
    };

    if let Some(text) = form.text_input.filter(|t| !t.trim().is_empty()) {
        return run_text_detection(&state, text).await;
    }

    if let Some(file) = form.file {
        if file.filename.is_empty() {
            return bad_request("No file selected");
        }
        let upload = match TempUpload::save(
            &state.config.upload_root,
            "text",
            &file.filename,
            &file.data,
        ) {
            Ok(upload) => upload,
            Err(e) => return upload_error_response(e),
        };

        // The guard deletes the file on every path out of this block.
        let text = match std::fs::read_to_string(upload.path()) {
            Ok(text) => text,
            Err(_) => return bad_request("Invalid file format. Please upload a text file."),
        };
        drop(upload);

        if text.trim().is_empty() {
            return bad_request("The uploaded file is empty");
        }
        return run_text_detection(&state, text).await;
    }

    bad_request("No text or file provided")
}

async fn run_text_detection(state: &web::Data<AppState>, text: String) -> HttpResponse {
    let detector = match text_detector(state).await {
        Ok(detector) => detector,
        Err(e @ LoadError::Timeout) => {
            error!("Text model load wait expired: {}", e);
            return HttpResponse::ServiceUnavailable().json(json!({
                "error": e.to_string(),
                "status": "loading"
            }));
        }
        Err(e) => {
            error!("Error in text detection: {}", e);
            return internal_error(format!("Text detection failed: {}", e));
        }
    };

    match web::block(move || detector.detect(&text)).await {
        Ok(Ok(result)) => HttpResponse::Ok().json(result),
        Ok(Err(e @ DetectError::EmptyText)) => bad_request(&e.to_string()),
        Ok(Err(e)) => {
            error!("Error in text detection: {}", e);
            internal_error(format!("Text detection failed: {}", e))
        }
        Err(e) => {
            error!("Text detection task failed: {}", e);
            internal_error(format!("Text detection failed: {}", e))
        }
    }
}

async fn detect_audio(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let form = match read_detect_form(payload).await {
        Ok(form) => form,
        Err(e) => return upload_error_response(e),
    };
    let Some(file) = form.file else {
        return bad_request("No file part");
    };
    if let Err(response) = validate_file_part(&file) {
        return response;
    }

    let upload = match TempUpload::save(
        &state.config.upload_root,
        "audio",
        &file.filename,
        &file.data,
    ) {
        Ok(upload) => upload,
        Err(e) => return upload_error_response(e),
    };

    let detector = match audio_detector(&state).await {
        Ok(detector) => detector,
        Err(e) => {
            error!("Error in audio detection: {}", e);
            return HttpResponse::Ok().json(DetectionResult::processing_error(e.to_string()));
        }
    };

    run_on_upload(upload, move |path| detector.detect(path)).await
}

async fn detect_image(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let form = match read_detect_form(payload).await {
        Ok(form) => form,
        Err(e) => return upload_error_response(e),
    };
    let Some(file) = form.file else {
        return bad_request("No file part");
    };
    if let Err(response) = validate_file_part(&file) {
        return response;
    }

    let upload = match TempUpload::save(
        &state.config.upload_root,
        "image",
        &file.filename,
        &file.data,
    ) {
        Ok(upload) => upload,
        Err(e) => return upload_error_response(e),
    };

    let detector = match image_detector(&state).await {
        Ok(detector) => detector,
        Err(e) => {
            error!("Error in image detection: {}", e);
            return HttpResponse::Ok().json(DetectionResult::processing_error(e.to_string()));
        }
    };

    run_on_upload(upload, move |path| detector.detect(path)).await
}

async fn detect_video(state: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let form = match read_detect_form(payload).await {
        Ok(form) => form,
        Err(e) => return upload_error_response(e),
    };
    let Some(file) = form.file else {
        return bad_request("No file part");
    };
    if let Err(response) = validate_file_part(&file) {
        return response;
    }

    let upload = match TempUpload::save(
        &state.config.upload_root,
        "video",
        &file.filename,
        &file.data,
    ) {
        Ok(upload) => upload,
        Err(e) => return upload_error_response(e),
    };

    // Video frames run through the image model.
    let detector = match image_detector(&state).await {
        Ok(detector) => detector,
        Err(e) => {
            error!("Error in video detection: {}", e);
            return HttpResponse::Ok().json(DetectionResult::processing_error(e.to_string()));
        }
    };

    let interval = state.config.frame_interval_secs;
    run_on_upload(upload, move |path| video::detect(path, interval, &detector)).await
}

/// Runs a self-contained pipeline on the blocking pool; the upload guard is
/// dropped inside the closure so the file is gone before the response goes
/// out, success or failure.
async fn run_on_upload<F>(upload: TempUpload, pipeline: F) -> HttpResponse
where
    F: FnOnce(&std::path::Path) -> DetectionResult + Send + 'static,
{
    match web::block(move || {
        let result = pipeline(upload.path());
        drop(upload);
        result
    })
    .await
    {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            error!("Detection task failed: {}", e);
            internal_error(format!("Detection failed: {}", e))
        }
    }
}
