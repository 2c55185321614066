//! MotionAnalyzer - pure frame-pair motion analysis
//!
//! Pipeline: optional box blur -> per-pixel absolute difference ->
//! binary threshold -> 8-connected component extraction -> area filter.
//! Everything here is deterministic and does no I/O, so callers can run
//! it inside `spawn_blocking` with owned buffers.

pub mod debug;

use crate::error::Result;
use image::imageops::FilterType;
use image::GrayImage;

/// Thresholds driving a motion decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionParams {
    /// Pixel difference threshold (0-255); a pixel counts as changed
    /// when its absolute difference exceeds this
    pub motion_threshold: u8,
    /// Minimum component area in pixels to count as significant motion
    pub min_motion_area: u32,
    /// Box blur kernel side; 0 or 1 skips smoothing, otherwise odd
    pub blur_kernel: u32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            motion_threshold: 25,
            min_motion_area: 500,
            blur_kernel: 0,
        }
    }
}

/// Difference statistics for one frame pair
#[derive(Debug, Clone, PartialEq)]
pub struct MotionStats {
    /// Mean absolute pixel difference
    pub mean_diff: f64,
    /// Maximum absolute pixel difference
    pub max_diff: u8,
    /// Pixels above the threshold
    pub changed_pixels: u64,
    /// Total pixels compared
    pub total_pixels: u64,
    /// changed_pixels / total_pixels as a percentage
    pub change_percent: f64,
    /// All component areas, in row-major discovery order
    pub component_areas: Vec<u32>,
    /// Component areas >= min_motion_area
    pub significant_areas: Vec<u32>,
}

/// Keep/discard outcome for one frame pair
#[derive(Debug, Clone, PartialEq)]
pub struct MotionDecision {
    /// true when at least one significant component exists
    pub keep: bool,
    /// Diagnostic statistics
    pub stats: MotionStats,
    /// Parameters the decision was made under
    pub params: MotionParams,
}

/// Decode JPEG/PNG bytes into a grayscale buffer
pub fn decode_gray(data: &[u8]) -> Result<GrayImage> {
    Ok(image::load_from_memory(data)?.to_luma8())
}

/// Compare a candidate frame against a reference frame.
///
/// When dimensions differ the candidate wins and the reference is
/// resampled to match. Identical inputs and parameters always yield
/// identical output.
pub fn analyze(
    reference: &GrayImage,
    candidate: &GrayImage,
    params: &MotionParams,
) -> MotionDecision {
    let (width, height) = candidate.dimensions();

    let resized;
    let reference = if reference.dimensions() != (width, height) {
        resized = image::imageops::resize(reference, width, height, FilterType::Triangle);
        &resized
    } else {
        reference
    };

    let blurred;
    let (reference, candidate) = if params.blur_kernel > 1 {
        blurred = (
            box_blur(reference, params.blur_kernel),
            box_blur(candidate, params.blur_kernel),
        );
        (&blurred.0, &blurred.1)
    } else {
        (reference, candidate)
    };

    let diff = absdiff(reference, candidate);
    let total_pixels = diff.len() as u64;

    let mut sum: u64 = 0;
    let mut max_diff: u8 = 0;
    for &d in &diff {
        sum += d as u64;
        max_diff = max_diff.max(d);
    }
    let mean_diff = if total_pixels > 0 {
        sum as f64 / total_pixels as f64
    } else {
        0.0
    };

    let mask: Vec<bool> = diff.iter().map(|&d| d > params.motion_threshold).collect();
    let changed_pixels = mask.iter().filter(|&&m| m).count() as u64;
    let change_percent = if total_pixels > 0 {
        changed_pixels as f64 / total_pixels as f64 * 100.0
    } else {
        0.0
    };

    let (_, component_areas) = label_components(&mask, width, height);
    let significant_areas: Vec<u32> = component_areas
        .iter()
        .copied()
        .filter(|&area| area >= params.min_motion_area)
        .collect();
    let keep = !significant_areas.is_empty();

    MotionDecision {
        keep,
        stats: MotionStats {
            mean_diff,
            max_diff,
            changed_pixels,
            total_pixels,
            change_percent,
            component_areas,
            significant_areas,
        },
        params: *params,
    }
}

/// Stateful pairwise filter over a frame sequence.
///
/// The first frame is always kept and becomes the reference. Each later
/// frame is compared against the last KEPT frame; the reference advances
/// only when motion is detected, so slow drift accumulates until it
/// crosses the threshold instead of being absorbed one frame at a time.
pub struct SequenceFilter {
    params: MotionParams,
    reference: Option<GrayImage>,
}

impl SequenceFilter {
    pub fn new(params: MotionParams) -> Self {
        Self {
            params,
            reference: None,
        }
    }

    /// The current reference frame, if any (the last kept frame)
    pub fn reference(&self) -> Option<&GrayImage> {
        self.reference.as_ref()
    }

    /// Decide on the next frame of the sequence.
    ///
    /// Returns `None` for the first frame (kept unconditionally, no
    /// decision possible), otherwise the decision. An undecodable frame
    /// must not reach this method; callers keep it without advancing
    /// the reference.
    pub fn push(&mut self, candidate: GrayImage) -> Option<MotionDecision> {
        match self.reference.take() {
            None => {
                self.reference = Some(candidate);
                None
            }
            Some(reference) => {
                let decision = analyze(&reference, &candidate, &self.params);
                self.reference = Some(if decision.keep { candidate } else { reference });
                Some(decision)
            }
        }
    }
}

/// Per-pixel absolute difference of two equally sized buffers
fn absdiff(a: &GrayImage, b: &GrayImage) -> Vec<u8> {
    a.as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| x.abs_diff(y))
        .collect()
}

/// Separable box blur with clamped borders. `kernel` must be odd > 1.
fn box_blur(img: &GrayImage, kernel: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    let radius = (kernel / 2) as i64;
    let src = img.as_raw();

    // Horizontal pass
    let mut horizontal = vec![0u8; src.len()];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut sum: u32 = 0;
            let mut count: u32 = 0;
            for dx in -radius..=radius {
                let sx = x + dx;
                if (0..width as i64).contains(&sx) {
                    sum += src[(y * width as i64 + sx) as usize] as u32;
                    count += 1;
                }
            }
            horizontal[(y * width as i64 + x) as usize] = (sum / count) as u8;
        }
    }

    // Vertical pass
    let mut out = vec![0u8; src.len()];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut sum: u32 = 0;
            let mut count: u32 = 0;
            for dy in -radius..=radius {
                let sy = y + dy;
                if (0..height as i64).contains(&sy) {
                    sum += horizontal[(sy * width as i64 + x) as usize] as u32;
                    count += 1;
                }
            }
            out[(y * width as i64 + x) as usize] = (sum / count) as u8;
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| img.clone())
}

/// 8-connected component labelling over a binary mask.
///
/// Pixels are scanned row-major, so label numbering and the returned
/// area order are deterministic. Returns per-pixel labels (0 = no
/// component, labels start at 1) and areas indexed by `label - 1`.
pub(crate) fn label_components(mask: &[bool], width: u32, height: u32) -> (Vec<u32>, Vec<u32>) {
    let width = width as i64;
    let height = height as i64;
    let mut labels = vec![0u32; mask.len()];
    let mut areas = Vec::new();

    for start_y in 0..height {
        for start_x in 0..width {
            let start = (start_y * width + start_x) as usize;
            if !mask[start] || labels[start] != 0 {
                continue;
            }

            let label = areas.len() as u32 + 1;
            let mut area = 0u32;
            let mut to_fill = vec![(start_x, start_y)];
            labels[start] = label;

            while let Some((x, y)) = to_fill.pop() {
                area += 1;

                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if !(0..width).contains(&nx) || !(0..height).contains(&ny) {
                            continue;
                        }
                        let idx = (ny * width + nx) as usize;
                        if mask[idx] && labels[idx] == 0 {
                            labels[idx] = label;
                            to_fill.push((nx, ny));
                        }
                    }
                }
            }

            areas.push(area);
        }
    }

    (labels, areas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([value]))
    }

    /// 100x100 dark frame with a 30x30 bright block at (10, 10)
    fn frame_with_block() -> GrayImage {
        let mut img = flat(100, 100, 0);
        for y in 10..40 {
            for x in 10..40 {
                img.put_pixel(x, y, image::Luma([255]));
            }
        }
        img
    }

    #[test]
    fn test_identical_frames_discard() {
        let frame = frame_with_block();
        for threshold in [1, 25, 200] {
            let params = MotionParams {
                motion_threshold: threshold,
                ..Default::default()
            };
            let decision = analyze(&frame, &frame, &params);
            assert!(!decision.keep);
            assert!(decision.stats.significant_areas.is_empty());
            assert_eq!(decision.stats.changed_pixels, 0);
            assert_eq!(decision.stats.max_diff, 0);
        }
    }

    #[test]
    fn test_block_detected_with_exact_area() {
        let params = MotionParams {
            motion_threshold: 25,
            min_motion_area: 500,
            blur_kernel: 0,
        };
        let decision = analyze(&flat(100, 100, 0), &frame_with_block(), &params);

        assert!(decision.keep);
        assert_eq!(decision.stats.significant_areas, vec![900]);
        assert_eq!(decision.stats.changed_pixels, 900);
        assert_eq!(decision.stats.max_diff, 255);
        assert!((decision.stats.change_percent - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_blob_below_min_area_discarded() {
        let mut candidate = flat(100, 100, 0);
        for y in 0..10 {
            for x in 0..10 {
                candidate.put_pixel(x, y, image::Luma([255]));
            }
        }
        let params = MotionParams {
            motion_threshold: 25,
            min_motion_area: 500,
            blur_kernel: 0,
        };
        let decision = analyze(&flat(100, 100, 0), &candidate, &params);

        assert!(!decision.keep);
        assert_eq!(decision.stats.component_areas, vec![100]);
        assert!(decision.stats.significant_areas.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let reference = flat(64, 64, 40);
        let candidate = frame_with_block();
        let params = MotionParams::default();

        let first = analyze(&reference, &candidate, &params);
        let second = analyze(&reference, &candidate, &params);
        assert_eq!(first, second);
    }

    #[test]
    fn test_diagonal_pixels_form_one_component() {
        let mask = vec![
            true, false, false, //
            false, true, false, //
            false, false, true,
        ];
        let (_, areas) = label_components(&mask, 3, 3);
        assert_eq!(areas, vec![3]);
    }

    #[test]
    fn test_blur_suppresses_single_pixel_noise() {
        let mut candidate = flat(21, 21, 0);
        candidate.put_pixel(10, 10, image::Luma([255]));

        let params = MotionParams {
            motion_threshold: 25,
            min_motion_area: 1,
            blur_kernel: 5,
        };
        let decision = analyze(&flat(21, 21, 0), &candidate, &params);
        // 255 spread over a 5x5 window is ~10 per pixel, under the threshold
        assert!(!decision.keep);
        assert_eq!(decision.stats.changed_pixels, 0);
    }

    #[test]
    fn test_dimension_mismatch_candidate_wins() {
        let reference = flat(50, 50, 0);
        let candidate = flat(100, 100, 0);
        let decision = analyze(&reference, &candidate, &MotionParams::default());
        assert_eq!(decision.stats.total_pixels, 100 * 100);
    }

    #[test]
    fn test_sequence_first_frame_always_kept() {
        let mut filter = SequenceFilter::new(MotionParams::default());
        assert!(filter.push(flat(100, 100, 0)).is_none());
    }

    #[test]
    fn test_sequence_reference_advances_only_on_keep() {
        let params = MotionParams {
            motion_threshold: 25,
            min_motion_area: 500,
            blur_kernel: 0,
        };
        let mut filter = SequenceFilter::new(params);

        // Frame 1: base, kept unconditionally
        assert!(filter.push(flat(100, 100, 0)).is_none());
        // Frame 2: identical, discarded
        assert!(!filter.push(flat(100, 100, 0)).unwrap().keep);
        // Frame 3: bright block appears, kept with area 900
        let decision = filter.push(frame_with_block()).unwrap();
        assert!(decision.keep);
        assert_eq!(decision.stats.significant_areas, vec![900]);
        // Frames 4-5: identical to frame 3, discarded against the new reference
        assert!(!filter.push(frame_with_block()).unwrap().keep);
        assert!(!filter.push(frame_with_block()).unwrap().keep);
    }

    #[test]
    fn test_sequence_drift_accumulates_against_kept_reference() {
        // Each step is below the threshold alone but the reference stays
        // pinned at the first frame, so drift eventually crosses it.
        let params = MotionParams {
            motion_threshold: 25,
            min_motion_area: 1,
            blur_kernel: 0,
        };
        let mut filter = SequenceFilter::new(params);

        filter.push(flat(10, 10, 0));
        assert!(!filter.push(flat(10, 10, 15)).unwrap().keep);
        assert!(!filter.push(flat(10, 10, 25)).unwrap().keep);
        // 30 vs the original 0 crosses the threshold
        assert!(filter.push(flat(10, 10, 30)).unwrap().keep);
    }
}
