//! Photo quality gate.
//!
//! Scores a candidate enrollment photo before it is trusted: brightness
//! and contrast from the luma of the face crop, sharpness from the
//! variance of a discrete Laplacian over the same crop. The gate runs
//! twice in the pipeline — an advisory pass at intake and the
//! authoritative pass during enrollment processing — with identical
//! formulas, so identical bytes always produce identical reports.

use crate::extract::FaceLocator;
use thiserror::Error;

const PENALTY_BRIGHTNESS: u8 = 30;
const PENALTY_CONTRAST: u8 = 20;
const PENALTY_SHARPNESS: u8 = 30;
const PENALTY_FACE_SIZE: u8 = 25;

pub const REASON_NO_FACE: &str = "no face detected";
pub const REASON_TOO_DARK: &str = "too dark";
pub const REASON_TOO_BRIGHT: &str = "too bright";
pub const REASON_LOW_CONTRAST: &str = "low contrast";
pub const REASON_BLURRY: &str = "image is blurry";
pub const REASON_FACE_TOO_SMALL: &str = "face too small";

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("failed to decode photo: {0}")]
    Decode(#[from] image::ImageError),
}

/// Thresholds for the quality gate. All comparisons are inclusive:
/// an exactly-threshold value passes.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Acceptable mean-luma range for the face crop.
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Minimum luma standard deviation.
    pub min_contrast: f32,
    /// Minimum Laplacian variance.
    pub min_sharpness: f32,
    /// Minimum face crop width in pixels.
    pub min_face_width_px: u32,
    /// Minimum score for a photo with no issues to pass.
    pub pass_score: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_brightness: 40.0,
            max_brightness: 220.0,
            min_contrast: 20.0,
            min_sharpness: 60.0,
            min_face_width_px: 80,
            pass_score: 60,
        }
    }
}

/// Raw measurements behind a quality decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityMetrics {
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub face_width_px: u32,
    pub face_height_px: u32,
}

/// Outcome of evaluating one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub passed: bool,
    pub score: u8,
    pub reasons: Vec<String>,
    pub metrics: QualityMetrics,
}

impl QualityReport {
    fn no_face() -> Self {
        Self {
            passed: false,
            score: 0,
            reasons: vec![REASON_NO_FACE.to_string()],
            metrics: QualityMetrics {
                brightness: 0.0,
                contrast: 0.0,
                sharpness: 0.0,
                face_width_px: 0,
                face_height_px: 0,
            },
        }
    }
}

/// Quality gate over a pluggable face locator.
pub struct QualityGate<L: FaceLocator> {
    locator: L,
    config: QualityConfig,
}

impl<L: FaceLocator> QualityGate<L> {
    pub fn new(locator: L, config: QualityConfig) -> Self {
        Self { locator, config }
    }

    /// Decode an encoded photo and evaluate it.
    pub fn evaluate(&self, photo: &[u8]) -> Result<QualityReport, QualityError> {
        let luma = image::load_from_memory(photo)?.to_luma8();
        let (width, height) = luma.dimensions();
        Ok(self.evaluate_luma(luma.as_raw(), width, height))
    }

    /// Evaluate a grayscale frame directly (width * height luma bytes).
    pub fn evaluate_luma(&self, luma: &[u8], width: u32, height: u32) -> QualityReport {
        let Some(region) = self.locator.locate(luma, width, height) else {
            return QualityReport::no_face();
        };

        let crop = crop_luma(luma, width, height, region);
        let crop_w = region.width.min(width.saturating_sub(region.x));
        let crop_h = region.height.min(height.saturating_sub(region.y));

        let brightness = mean(&crop);
        let contrast = stddev(&crop, brightness);
        let sharpness = laplacian_variance(&crop, crop_w as usize, crop_h as usize);

        let metrics = QualityMetrics {
            brightness,
            contrast,
            sharpness,
            face_width_px: crop_w,
            face_height_px: crop_h,
        };

        let cfg = &self.config;
        let mut score = 100u8;
        let mut reasons = Vec::new();

        if brightness < cfg.min_brightness {
            score = score.saturating_sub(PENALTY_BRIGHTNESS);
            reasons.push(REASON_TOO_DARK.to_string());
        } else if brightness > cfg.max_brightness {
            score = score.saturating_sub(PENALTY_BRIGHTNESS);
            reasons.push(REASON_TOO_BRIGHT.to_string());
        }
        if contrast < cfg.min_contrast {
            score = score.saturating_sub(PENALTY_CONTRAST);
            reasons.push(REASON_LOW_CONTRAST.to_string());
        }
        if sharpness < cfg.min_sharpness {
            score = score.saturating_sub(PENALTY_SHARPNESS);
            reasons.push(REASON_BLURRY.to_string());
        }
        if crop_w < cfg.min_face_width_px {
            score = score.saturating_sub(PENALTY_FACE_SIZE);
            reasons.push(REASON_FACE_TOO_SMALL.to_string());
        }

        let passed = reasons.is_empty() && score >= cfg.pass_score;
        tracing::debug!(score, passed, ?reasons, "photo evaluated");

        QualityReport {
            passed,
            score,
            reasons,
            metrics,
        }
    }
}

/// Extract the face crop, clamped to the frame bounds.
fn crop_luma(luma: &[u8], width: u32, height: u32, region: crate::FaceRegion) -> Vec<u8> {
    let x0 = region.x.min(width) as usize;
    let y0 = region.y.min(height) as usize;
    let x1 = (region.x + region.width).min(width) as usize;
    let y1 = (region.y + region.height).min(height) as usize;

    let mut out = Vec::with_capacity((x1 - x0) * (y1 - y0));
    for y in y0..y1 {
        out.extend_from_slice(&luma[y * width as usize + x0..y * width as usize + x1]);
    }
    out
}

fn mean(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
}

fn stddev(data: &[u8], mean: f32) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let variance =
        data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / data.len() as f32;
    variance.sqrt()
}

/// Variance of the 4-neighbour discrete Laplacian over interior pixels.
/// Crops smaller than 3x3 have no interior and score 0.
fn laplacian_variance(crop: &[u8], w: usize, h: usize) -> f32 {
    if w < 3 || h < 3 || crop.len() < w * h {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let p = crop[y * w + x] as f32;
            let up = crop[(y - 1) * w + x] as f32;
            let down = crop[(y + 1) * w + x] as f32;
            let left = crop[y * w + x - 1] as f32;
            let right = crop[y * w + x + 1] as f32;
            responses.push(4.0 * p - up - down - left - right);
        }
    }

    let n = responses.len() as f32;
    let m = responses.iter().sum::<f32>() / n;
    responses.iter().map(|r| (r - m).powi(2)).sum::<f32>() / n
}
