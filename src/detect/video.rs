use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use tempfile::TempDir;

use super::image::ImageDetector;
use super::result::DetectionResult;
use super::{round2, DetectError};

/// Classifies a video by sampling one frame per `interval_secs`, running
/// each through the image pipeline and aggregating the fake fraction.
/// Any failure becomes a structured error result.
pub fn detect(
    video_path: &Path,
    interval_secs: u32,
    image_detector: &ImageDetector,
) -> DetectionResult {
    let (frames_dir, frame_paths) = match extract_frames(video_path, interval_secs) {
        Ok(extracted) => extracted,
        Err(e) => {
            log::error!("Error in video detection: {}", e);
            return DetectionResult::processing_error(e.to_string());
        }
    };

    if frame_paths.is_empty() {
        return DetectionResult::processing_error("No frames could be extracted from the video");
    }

    let frame_results: Vec<DetectionResult> = frame_paths
        .iter()
        .map(|frame| image_detector.detect(frame))
        .collect();

    let result = aggregate_frames(&frame_results);

    // Frame files are per-request scratch; removal failure is not a
    // detection failure.
    if let Err(e) = frames_dir.close() {
        log::warn!("Failed to remove temporary frame directory: {}", e);
    }

    result
}

/// Folds per-frame verdicts into one. The video is flagged fake iff the
/// fake fraction strictly exceeds 10%; frames that themselves errored count
/// toward the total but never as fake.
pub fn aggregate_frames(frame_results: &[DetectionResult]) -> DetectionResult {
    let total = frame_results.len();
    if total == 0 {
        return DetectionResult::processing_error("No frames could be extracted from the video");
    }

    let fake = frame_results
        .iter()
        .filter(|r| r.error.is_none() && r.is_positive)
        .count();

    // Integer comparison keeps the 10% boundary exact: fake/total > 1/10.
    let is_fake = fake * 10 > total;
    let fake_percentage = round2(fake as f32 / total as f32 * 100.0);
    let confidence = if is_fake {
        fake_percentage
    } else {
        round2(100.0 - fake_percentage)
    };

    let mut result = DetectionResult::classified(
        if is_fake { "Likely deepfake" } else { "Genuine" },
        is_fake,
        confidence,
        Default::default(),
    );
    result.frames_analyzed = Some(total);
    result.fake_frames = Some(fake);
    result.fake_percentage = Some(fake_percentage);
    result
}

/// Decodes the video and writes one JPEG per interval boundary (t = 0,
/// interval, 2*interval, ... < duration) into a temporary directory.
fn extract_frames(
    video_path: &Path,
    interval_secs: u32,
) -> Result<(TempDir, Vec<PathBuf>), DetectError> {
    ffmpeg::init()?;

    let mut ictx = ffmpeg::format::input(video_path)?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or(ffmpeg::Error::StreamNotFound)?;
    let stream_index = stream.index();

    let fps = f64::from(stream.avg_frame_rate());
    if fps <= 0.0 {
        return Err(DetectError::Other(
            "unable to determine video frame rate".into(),
        ));
    }

    let frame_count = stream.frames();
    let duration_secs = if frame_count > 0 {
        frame_count as f64 / fps
    } else {
        // Container duration in AV_TIME_BASE (microsecond) units.
        ictx.duration().max(0) as f64 / 1_000_000.0
    };

    let targets: Vec<i64> = (0..duration_secs as u64)
        .step_by(interval_secs.max(1) as usize)
        .map(|t| (fps * t as f64) as i64)
        .collect();

    let dir = tempfile::tempdir()?;
    let mut frame_paths = Vec::new();
    if targets.is_empty() {
        return Ok((dir, frame_paths));
    }

    let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(
        ictx.stream(stream_index)
            .ok_or(ffmpeg::Error::StreamNotFound)?
            .parameters(),
    )?;
    let mut decoder = decoder_ctx.decoder().video()?;
    let mut scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::flag::Flags::BILINEAR,
    )?;

    let mut decoded_index: i64 = 0;
    let mut next_target = 0usize;
    let mut frame = ffmpeg::util::frame::Video::empty();
    let mut rgb = ffmpeg::util::frame::Video::empty();

    'demux: for (packet_stream, packet) in ictx.packets() {
        if packet_stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        while decoder.receive_frame(&mut frame).is_ok() {
            if next_target < targets.len() && decoded_index >= targets[next_target] {
                scaler.run(&frame, &mut rgb)?;
                let path = dir.path().join(format!("frame_{:04}.jpg", next_target));
                save_rgb_frame(&rgb, &path)?;
                frame_paths.push(path);
                next_target += 1;
                if next_target >= targets.len() {
                    break 'demux;
                }
            }
            decoded_index += 1;
        }
    }

    if next_target < targets.len() {
        decoder.send_eof()?;
        while decoder.receive_frame(&mut frame).is_ok() {
            if next_target < targets.len() && decoded_index >= targets[next_target] {
                scaler.run(&frame, &mut rgb)?;
                let path = dir.path().join(format!("frame_{:04}.jpg", next_target));
                save_rgb_frame(&rgb, &path)?;
                frame_paths.push(path);
                next_target += 1;
            }
            decoded_index += 1;
        }
    }

    Ok((dir, frame_paths))
}

/// Copies an RGB24 frame out of its padded stride layout and writes a JPEG.
fn save_rgb_frame(rgb: &ffmpeg::util::frame::Video, path: &Path) -> Result<(), DetectError> {
    let width = rgb.width() as usize;
    let height = rgb.height() as usize;
    let stride = rgb.stride(0);
    let data = rgb.data(0);

    let mut pixels = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &data[y * stride..y * stride + width * 3];
        pixels.extend_from_slice(row);
    }

    let img = image::RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| DetectError::Other("decoded frame has inconsistent dimensions".into()))?;
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn frame(is_fake: bool) -> DetectionResult {
        DetectionResult::classified(
            if is_fake { "Fake" } else { "Real" },
            is_fake,
            90.0,
            BTreeMap::new(),
        )
    }

    #[test]
    fn one_fake_in_twenty_is_genuine() {
        let mut frames = vec![frame(true)];
        frames.extend((0..19).map(|_| frame(false)));

        let result = aggregate_frames(&frames);
        assert_eq!(result.prediction, "Genuine");
        assert!(!result.is_positive);
        assert_eq!(result.confidence, 95.0);
        assert_eq!(result.fake_percentage, Some(5.0));
        assert_eq!(result.frames_analyzed, Some(20));
        assert_eq!(result.fake_frames, Some(1));
    }

    #[test]
    fn exactly_ten_percent_is_genuine() {
        let mut frames = vec![frame(true), frame(true)];
        frames.extend((0..18).map(|_| frame(false)));

        let result = aggregate_frames(&frames);
        assert_eq!(result.prediction, "Genuine");
        assert_eq!(result.confidence, 90.0);
    }

    #[test]
    fn above_ten_percent_is_fake() {
        let mut frames = vec![frame(true), frame(true), frame(true)];
        frames.extend((0..17).map(|_| frame(false)));

        let result = aggregate_frames(&frames);
        assert_eq!(result.prediction, "Likely deepfake");
        assert!(result.is_positive);
        assert_eq!(result.confidence, 15.0);
        assert_eq!(result.fake_frames, Some(3));
    }

    #[test]
    fn errored_frames_count_toward_total_but_not_fake() {
        let frames = vec![
            frame(true),
            DetectionResult::processing_error("bad frame"),
            frame(false),
            frame(false),
        ];

        let result = aggregate_frames(&frames);
        assert_eq!(result.frames_analyzed, Some(4));
        assert_eq!(result.fake_frames, Some(1));
        // 1/4 = 25% > 10%
        assert_eq!(result.prediction, "Likely deepfake");
    }

    #[test]
    fn zero_frames_is_a_structured_error() {
        let result = aggregate_frames(&[]);
        assert_eq!(result.prediction, "Error in processing");
        assert_eq!(result.confidence, 0.0);
        assert!(result.error.is_some());
    }

    #[test]
    fn all_fake_is_fully_confident() {
        let frames: Vec<_> = (0..5).map(|_| frame(true)).collect();
        let result = aggregate_frames(&frames);
        assert_eq!(result.prediction, "Likely deepfake");
        assert_eq!(result.confidence, 100.0);
    }
}
