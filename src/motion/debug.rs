//! Diagnostic visualizations for motion decisions
//!
//! Renders the four inspection images for one frame pair: the blurred
//! difference map, the binary threshold mask, all components highlighted
//! on the candidate frame, and significant components only.

use super::{box_blur, label_components, MotionParams};
use image::imageops::FilterType;
use image::{GrayImage, Rgb, RgbImage};

const COMPONENT_COLOR: Rgb<u8> = Rgb([255, 64, 64]);
const SIGNIFICANT_COLOR: Rgb<u8> = Rgb([64, 255, 64]);

/// The four auxiliary images for one frame pair
pub struct DebugImages {
    /// Absolute difference map
    pub diff: GrayImage,
    /// Binary threshold mask
    pub mask: GrayImage,
    /// Candidate frame with every component highlighted
    pub contours: RgbImage,
    /// Candidate frame with only significant components highlighted
    pub significant: RgbImage,
}

/// Render the visualization images with the same pipeline `analyze` uses
pub fn render(
    reference: &GrayImage,
    candidate: &GrayImage,
    params: &MotionParams,
) -> DebugImages {
    let (width, height) = candidate.dimensions();

    let resized;
    let reference = if reference.dimensions() != (width, height) {
        resized = image::imageops::resize(reference, width, height, FilterType::Triangle);
        &resized
    } else {
        reference
    };

    let blurred;
    let (reference_b, candidate_b) = if params.blur_kernel > 1 {
        blurred = (
            box_blur(reference, params.blur_kernel),
            box_blur(candidate, params.blur_kernel),
        );
        (&blurred.0, &blurred.1)
    } else {
        (reference, candidate)
    };

    let diff_pixels: Vec<u8> = reference_b
        .as_raw()
        .iter()
        .zip(candidate_b.as_raw().iter())
        .map(|(&a, &b)| a.abs_diff(b))
        .collect();

    let mask_bits: Vec<bool> = diff_pixels
        .iter()
        .map(|&d| d > params.motion_threshold)
        .collect();
    let mask_pixels: Vec<u8> = mask_bits.iter().map(|&m| if m { 255 } else { 0 }).collect();

    let (labels, areas) = label_components(&mask_bits, width, height);

    let mut contours = gray_to_rgb(candidate);
    let mut significant = gray_to_rgb(candidate);
    for (idx, &label) in labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        let x = (idx as u32) % width;
        let y = (idx as u32) / width;
        contours.put_pixel(x, y, COMPONENT_COLOR);
        if areas[(label - 1) as usize] >= params.min_motion_area {
            significant.put_pixel(x, y, SIGNIFICANT_COLOR);
        }
    }

    let diff = GrayImage::from_raw(width, height, diff_pixels)
        .unwrap_or_else(|| GrayImage::new(width, height));
    let mask = GrayImage::from_raw(width, height, mask_pixels)
        .unwrap_or_else(|| GrayImage::new(width, height));

    DebugImages {
        diff,
        mask,
        contours,
        significant,
    }
}

fn gray_to_rgb(img: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let v = pixel.0[0];
        out.put_pixel(x, y, Rgb([v, v, v]));
    }
    out
}
