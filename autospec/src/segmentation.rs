//! Segmentation of cutout images into the object at the cutout centre.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::SegmentationConfig;
use crate::cube::Image;
use crate::mask::{Mask, Segmentation};
use crate::math::statistics::sigma_clipped_background;

/// Pixels within this many pixels of the centre may seed the object.
const CENTER_SEARCH_RADIUS: usize = 2;

/// Clipping threshold for the background estimate, in sigma.
const BACKGROUND_CLIP_KAPPA: f32 = 3.0;

/// Produces a segmentation map of a cutout image.
///
/// Implementations must return masks on the image grid. `detections` holds
/// every object found, `object` the one nearest `center`; a blank `object`
/// means the target was not detected in that image.
pub trait Segmenter: Send + Sync {
    fn segment(&self, image: &Image, center: (usize, usize)) -> Segmentation;
}

/// Thresholds the image at `median + kappa * sigma` of its sigma-clipped
/// background. Every 8-connected component of at least `min_area` pixels is
/// a detection; the one closest to the centre is the object.
#[derive(Debug, Clone, Default)]
pub struct ThresholdSegmenter {
    pub config: SegmentationConfig,
}

impl ThresholdSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    fn seed(&self, detected: &Mask, center: (usize, usize)) -> Option<(usize, usize)> {
        let (cx, cy) = center;
        let r = CENTER_SEARCH_RADIUS;
        let x_range = cx.saturating_sub(r)..=(cx + r).min(detected.width().saturating_sub(1));
        let y_range = cy.saturating_sub(r)..=(cy + r).min(detected.height().saturating_sub(1));

        y_range
            .flat_map(|y| x_range.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| detected.get(x, y))
            .min_by_key(|&(x, y)| x.abs_diff(cx).pow(2) + y.abs_diff(cy).pow(2))
    }

    /// Components of `above` large enough to count as objects.
    fn detections(&self, above: &Mask) -> Mask {
        let (width, height) = (above.width(), above.height());
        let mut visited = Mask::empty(width, height);
        let mut kept = Mask::empty(width, height);

        for y in 0..height {
            for x in 0..width {
                if !above.get(x, y) || visited.get(x, y) {
                    continue;
                }
                let component = flood_fill(above, (x, y));
                visited = visited.union(&component);
                if component.count() >= self.config.min_area {
                    kept = kept.union(&component);
                }
            }
        }
        kept
    }
}

impl Segmenter for ThresholdSegmenter {
    fn segment(&self, image: &Image, center: (usize, usize)) -> Segmentation {
        let (width, height) = (image.width(), image.height());
        let background = sigma_clipped_background(
            image.data.pixels(),
            BACKGROUND_CLIP_KAPPA,
            self.config.clip_iterations,
        );
        let threshold = background.median + self.config.kappa * background.sigma;

        // A flat image has no object above its own background
        let above = Mask::from_fn(width, height, |x, y| {
            let v = image.data[(x, y)];
            v.is_finite() && v > threshold && background.sigma > 0.0
        });
        let detections = self.detections(&above);

        let object = match self.seed(&detections, center) {
            Some(seed) => flood_fill(&detections, seed),
            None => {
                debug!(threshold, "No object detected near cutout centre");
                Mask::empty(width, height)
            }
        };
        Segmentation { detections, object }
    }
}

/// Segmentation from an external label map.
///
/// Label maps mark each detected object with its own non-zero integer; the
/// object of interest is the one under the target. Background (0) or
/// non-finite labels at the centre yield a blank object.
pub fn label_segmentation(labels: &Image, center: (usize, usize)) -> Segmentation {
    let (width, height) = (labels.width(), labels.height());
    let detections = Mask::from_fn(width, height, |x, y| {
        let v = labels.data[(x, y)];
        v.is_finite() && v != 0.0
    });

    let label = labels.data[center];
    let object = if label.is_finite() && label != 0.0 {
        Mask::from_fn(width, height, |x, y| labels.data[(x, y)] == label)
    } else {
        Mask::empty(width, height)
    };
    Segmentation { detections, object }
}

/// 8-connected component of `mask` containing `seed`.
fn flood_fill(mask: &Mask, seed: (usize, usize)) -> Mask {
    let (width, height) = (mask.width(), mask.height());
    let mut out = Mask::empty(width, height);
    let mut queue = VecDeque::from([seed]);
    out.set(seed.0, seed.1, true);

    while let Some((x, y)) = queue.pop_front() {
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                if mask.get(nx, ny) && !out.get(nx, ny) {
                    out.set(nx, ny, true);
                    queue.push_back((nx, ny));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use common::buffer2::Buffer2;

    use super::*;
    use crate::testing::{gaussian_blob, sky_wcs};

    fn noisy_image(blobs: &[(f64, f64, f32)]) -> Image {
        let data = Buffer2::from_fn(31, 31, |x, y| {
            let noise = (((x * 7 + y * 13) % 11) as f32 - 5.0) * 0.02;
            let signal: f32 = blobs
                .iter()
                .map(|&(bx, by, amp)| amp * gaussian_blob(x as f64 - bx, y as f64 - by, 1.5))
                .sum();
            1.0 + noise + signal
        });
        Image::new(data, sky_wcs(31, 31))
    }

    #[test]
    fn test_central_object_and_neighbour_detection() {
        let image = noisy_image(&[(15.0, 15.0, 5.0), (4.0, 4.0, 5.0)]);
        let seg = ThresholdSegmenter::default().segment(&image, (15, 15));

        assert!(seg.object.get(15, 15));
        assert!(!seg.object.get(4, 4));
        assert!(seg.object.count() >= 9);
        assert!(seg.detections.get(4, 4));
        assert!(seg.detections.get(15, 15));
        assert!(seg.object.difference(&seg.detections).is_blank());
    }

    #[test]
    fn test_seed_tolerates_small_offset() {
        let image = noisy_image(&[(16.0, 14.0, 5.0)]);
        let seg = ThresholdSegmenter::default().segment(&image, (15, 15));
        assert!(seg.object.get(16, 14));
    }

    #[test]
    fn test_no_central_object_keeps_other_detections() {
        let image = noisy_image(&[(4.0, 4.0, 5.0)]);
        let seg = ThresholdSegmenter::default().segment(&image, (15, 15));
        assert!(seg.object.is_blank());
        assert!(seg.detections.get(4, 4));
    }

    #[test]
    fn test_flat_image_gives_blank_maps() {
        let image = Image::new(Buffer2::new_filled(9, 9, 3.0), sky_wcs(9, 9));
        let seg = ThresholdSegmenter::default().segment(&image, (4, 4));
        assert!(seg.object.is_blank());
        assert!(seg.detections.is_blank());
    }

    #[test]
    fn test_small_components_are_not_detections() {
        let segmenter = ThresholdSegmenter::default();
        let above = Mask::from_fn(8, 8, |x, y| (x, y) == (1, 1) || (x >= 4 && y >= 4));
        let detections = segmenter.detections(&above);
        assert!(!detections.get(1, 1));
        assert_eq!(detections.count(), 16);
    }

    #[test]
    fn test_label_segmentation() {
        let labels = Image::new(
            Buffer2::from_fn(6, 6, |x, _| match x {
                0 | 1 => 3.0,
                4 | 5 => 7.0,
                _ => 0.0,
            }),
            sky_wcs(6, 6),
        );
        let seg = label_segmentation(&labels, (5, 2));
        assert_eq!(seg.object.count(), 12);
        assert!(seg.object.get(4, 0) && !seg.object.get(0, 0));
        assert_eq!(seg.detections.count(), 24);

        let background = label_segmentation(&labels, (2, 2));
        assert!(background.object.is_blank());
        assert_eq!(background.detections.count(), 24);
    }

    #[test]
    fn test_flood_fill_follows_diagonals() {
        let mask = Mask::from_fn(5, 5, |x, y| x == y || (x == 4 && y == 0));
        let component = flood_fill(&mask, (0, 0));
        assert_eq!(component.count(), 5);
        assert!(!component.get(4, 0));
    }
}
