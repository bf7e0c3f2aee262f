//! Face extraction: detect, clamp to the image, crop.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::BoundingBox;
use image::{imageops, RgbImage};

/// A cropped face and the (clamped) box it was cut from.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    pub image: RgbImage,
}

/// Detect and crop every face in `image`.
///
/// An image with no detectable face yields an empty `Vec`, not an error.
/// Order follows the detector and is not guaranteed.
pub fn extract_faces<D: FaceDetector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
) -> Result<Vec<FaceRegion>, DetectorError> {
    let boxes = detector.detect(image)?;
    Ok(boxes.iter().filter_map(|b| crop(image, b)).collect())
}

/// Detect faces and crop only the one with the largest box area.
pub fn extract_largest_face<D: FaceDetector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
) -> Result<Option<FaceRegion>, DetectorError> {
    let boxes = detector.detect(image)?;
    let largest = boxes
        .iter()
        .filter(|b| b.area() > 0.0)
        .max_by(|a, b| a.area().total_cmp(&b.area()));
    Ok(largest.and_then(|b| crop(image, b)))
}

/// Crop `bbox` out of `image`, clamping negative origins to zero and the far
/// edges to the image bounds. Returns `None` if nothing is left.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<FaceRegion> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x0 = bbox.x.max(0.0).min(w).round();
    let y0 = bbox.y.max(0.0).min(h).round();
    let x1 = (bbox.x + bbox.width).max(0.0).min(w).round();
    let y1 = (bbox.y + bbox.height).max(0.0).min(h).round();

    if x1 <= x0 || y1 <= y0 {
        tracing::debug!(?bbox, "face box lies outside the image; skipping");
        return None;
    }

    let (x, y) = (x0 as u32, y0 as u32);
    let (cw, ch) = ((x1 - x0) as u32, (y1 - y0) as u32);
    let face = imageops::crop_imm(image, x, y, cw, ch).to_image();

    Some(FaceRegion {
        bbox: BoundingBox {
            x: x0,
            y: y0,
            width: cw as f32,
            height: ch as f32,
            confidence: bbox.confidence,
        },
        image: face,
    })
}
