//! Numeric heuristics for downscaling and box sizing.
//!
//! These reproduce the picking conventions RELION users expect, including
//! the truncating-division semantics of the legacy box-size formula.

/// Candidate downsampled box sizes, ascending (relion_it convention).
pub const BOX_SIZE_CANDIDATES: &[i64] = &[
    48, 64, 96, 128, 160, 192, 256, 288, 300, 320, 360, 384, 400, 420, 450, 480, 512, 640, 768,
    896, 1024,
];

/// Receptive window of the picking model (resnet8), in pixels.
const MODEL_WINDOW_PX: f64 = 71.0;

/// A downsampled box must keep the effective pixel size under this (Å),
/// i.e. a Nyquist frequency better than 8.5 Å.
const SMALL_BOX_ANGPIX_LIMIT: f64 = 4.25;

/// Micrograph downscale factor for picking, never below 4.
pub fn downscale_factor(diameter: i64, angpix: f64) -> i64 {
    ((2.0 * diameter as f64 / angpix / MODEL_WINDOW_PX) as i64).max(4)
}

/// Particle radius in downscaled pixels, passed to the extraction step.
pub fn extraction_radius(diameter: i64, angpix: f64, scale: i64) -> i64 {
    (diameter as f64 / (2.0 * angpix * scale as f64)) as i64
}

/// Suggested extraction box in unbinned pixels: diameter plus 10%, rounded
/// up to an even pixel count.
pub fn full_box_size(diameter: i64, angpix: f64) -> i64 {
    (diameter as f64 * 1.1 / angpix / 2.0).ceil() as i64 * 2
}

/// Suggested downsampled box: the first candidate that keeps the effective
/// pixel size under 4.25 Å, clamped to never exceed the full box.
pub fn binned_box_size(full_box: i64, angpix: f64) -> i64 {
    binned_box_with_limit(full_box, angpix, SMALL_BOX_ANGPIX_LIMIT)
}

fn binned_box_with_limit(full_box: i64, angpix: f64, limit: f64) -> i64 {
    for &candidate in BOX_SIZE_CANDIDATES {
        // Don't go larger than the original box.
        if candidate > full_box {
            return full_box;
        }
        if angpix * full_box as f64 / (candidate as f64) < limit {
            return candidate;
        }
    }
    full_box
}

/// Unbinned training box from the optics table: the binned image size scaled
/// by the pixel-size ratio, with the ratio floored first (legacy fixed-point
/// convention, so 1.9x binning counts as 1x).
pub fn unbinned_box_size(image_angpix: f64, original_angpix: f64, image_size: i64) -> i64 {
    (image_angpix / original_angpix).floor() as i64 * image_size
}
