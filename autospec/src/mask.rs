//! Object and sky masks.
//!
//! In segmentation mode the object mask comes from combining the target
//! object of each segmentation map and the sky is every pixel no map assigns
//! to any object. In aperture mode both come from circles around the cutout
//! centre. Either way the object and sky masks never share a pixel.

use common::bit_buffer2::BitBuffer2;
use common::buffer2::Buffer2;
use tracing::warn;

use crate::config::{ObjectMaskPolicy, SkyRegion};
use crate::cube::{Image, Wcs};
use crate::error::{Error, Result};

/// Boolean spatial mask over a cutout grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    bits: BitBuffer2,
}

impl Mask {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            bits: BitBuffer2::new_default(width, height),
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self {
            bits: BitBuffer2::new_filled(width, height, true),
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl FnMut(usize, usize) -> bool) -> Self {
        Self {
            bits: BitBuffer2::from_fn(width, height, f),
        }
    }

    /// Pixels with a finite, non-zero value.
    pub fn from_image(image: &Image) -> Self {
        Self::from_fn(image.width(), image.height(), |x, y| {
            let v = image.data[(x, y)];
            v.is_finite() && v != 0.0
        })
    }

    /// Disc of `radius` pixels around the 0-based `center`. Pixels whose
    /// centre lies on the rim are included.
    pub fn circle(width: usize, height: usize, center: (f64, f64), radius: f64) -> Self {
        // Absorbs round-off from arcsec to pixel conversion
        let r2 = radius * radius + 1e-9;
        Self::from_fn(width, height, |x, y| {
            let dx = x as f64 - center.0;
            let dy = y as f64 - center.1;
            dx * dx + dy * dy <= r2
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.bits.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.bits.height()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bits.get_xy(x, y)
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.bits.set_xy(x, y, value);
    }

    /// Number of selected pixels.
    #[inline]
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    #[inline]
    pub fn is_blank(&self) -> bool {
        self.bits.none()
    }

    /// Row-major indices of selected pixels.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.ones()
    }

    pub fn overlaps(&self, other: &Mask) -> bool {
        self.bits.intersects(&other.bits)
    }

    pub fn union(&self, other: &Mask) -> Mask {
        let mut bits = self.bits.clone();
        bits.or_assign(&other.bits);
        Mask { bits }
    }

    pub fn intersection(&self, other: &Mask) -> Mask {
        let mut bits = self.bits.clone();
        bits.and_assign(&other.bits);
        Mask { bits }
    }

    pub fn difference(&self, other: &Mask) -> Mask {
        let mut bits = self.bits.clone();
        bits.and_not_assign(&other.bits);
        Mask { bits }
    }

    pub fn complement(&self) -> Mask {
        Mask {
            bits: self.bits.not(),
        }
    }

    /// 0/1 image on the given grid.
    pub fn to_image(&self, wcs: &Wcs) -> Image {
        let data = Buffer2::from_fn(self.width(), self.height(), |x, y| {
            if self.get(x, y) { 1.0 } else { 0.0 }
        });
        Image::new(data, wcs.clone())
    }
}

/// One segmentation map on the cutout grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    /// Pixels of every object detected in the map.
    pub detections: Mask,
    /// Pixels of the object under the target; blank when it was not detected.
    pub object: Mask,
}

impl Segmentation {
    /// A map whose only detection is the target.
    pub fn object_only(object: Mask) -> Self {
        Self {
            detections: object.clone(),
            object,
        }
    }
}

/// Masks produced from segmentation maps.
#[derive(Debug, Clone)]
pub struct SegmentationMasks {
    /// Target pixels flagged in any map.
    pub union: Mask,
    /// Target pixels flagged in every map that found the target.
    pub intersection: Mask,
    /// Pixels no map assigns to any object.
    pub sky: Mask,
    /// The mask selected by the object policy.
    pub object: Mask,
    /// True when the intersection was empty and the union stood in for it.
    pub used_union_fallback: bool,
}

/// Combine segmentation maps into union, intersection, sky and object masks.
///
/// Union and intersection only see the target object of each map; the sky
/// excludes every detection, so neighbours never leak into it. Fails with
/// [`Error::DegenerateMask`] when no map found the target; the caller is
/// expected to switch to aperture extraction.
pub fn combine_segmentation_maps(
    maps: &[Segmentation],
    policy: ObjectMaskPolicy,
) -> Result<SegmentationMasks> {
    // A map that missed the target carries no shape information
    let mut found = maps.iter().map(|m| &m.object).filter(|m| !m.is_blank());
    let first = found.next().ok_or(Error::DegenerateMask)?;
    let (union, intersection) = found.fold(
        (first.clone(), first.clone()),
        |(union, inter), map| (union.union(map), inter.intersection(map)),
    );

    let occupied = maps
        .iter()
        .fold(union.clone(), |acc, map| acc.union(&map.detections));
    let sky = occupied.complement();

    let (object, used_union_fallback) = match policy {
        ObjectMaskPolicy::Union => (union.clone(), false),
        ObjectMaskPolicy::Intersection if intersection.is_blank() => {
            warn!(
                maps = maps.len(),
                "Intersection of segmentation maps is empty, using their union"
            );
            (union.clone(), true)
        }
        ObjectMaskPolicy::Intersection => (intersection.clone(), false),
    };

    Ok(SegmentationMasks {
        union,
        intersection,
        sky,
        object,
        used_union_fallback,
    })
}

/// Masks for a circular aperture.
#[derive(Debug, Clone)]
pub struct ApertureMasks {
    pub object: Mask,
    pub sky: Mask,
    pub radius_px: f64,
}

/// Circular object aperture of `radius_arcsec` around `center`, with the sky
/// taken from the complement or from an annulus.
pub fn aperture_masks(
    width: usize,
    height: usize,
    center: (f64, f64),
    radius_arcsec: f64,
    pixel_scale_arcsec: f64,
    sky_region: SkyRegion,
) -> Result<ApertureMasks> {
    let radius_px = radius_arcsec / pixel_scale_arcsec;
    let object = Mask::circle(width, height, center, radius_px);
    if object.is_blank() {
        return Err(Error::EmptyMask { what: "aperture" });
    }

    let sky = match sky_region {
        SkyRegion::Complement => object.complement(),
        SkyRegion::Annulus { inner, outer } => {
            let outer_disc = Mask::circle(width, height, center, outer / pixel_scale_arcsec);
            let inner_disc = Mask::circle(width, height, center, inner / pixel_scale_arcsec);
            outer_disc.difference(&inner_disc).difference(&object)
        }
    };

    Ok(ApertureMasks {
        object,
        sky,
        radius_px,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(x0: usize, y0: usize, size: usize) -> Mask {
        Mask::from_fn(10, 10, |x, y| {
            (x0..x0 + size).contains(&x) && (y0..y0 + size).contains(&y)
        })
    }

    fn seg(object: &Mask) -> Segmentation {
        Segmentation::object_only(object.clone())
    }

    #[test]
    fn test_union_and_intersection() {
        let a = block(2, 2, 4);
        let b = block(4, 4, 4);
        let masks = combine_segmentation_maps(&[seg(&a), seg(&b)], ObjectMaskPolicy::Union).unwrap();

        assert_eq!(masks.union.count(), 16 + 16 - 4);
        assert_eq!(masks.intersection.count(), 4);
        assert_eq!(masks.sky.count(), 100 - 28);
        assert_eq!(masks.object, masks.union);
        assert!(!masks.object.overlaps(&masks.sky));
        assert!(!masks.used_union_fallback);

        let inter = combine_segmentation_maps(&[seg(&a), seg(&b)], ObjectMaskPolicy::Intersection).unwrap();
        assert_eq!(inter.object, inter.intersection);
        assert!(!inter.object.overlaps(&inter.sky));
    }

    #[test]
    fn test_empty_intersection_falls_back_to_union() {
        let a = block(0, 0, 3);
        let b = block(6, 6, 3);
        let masks =
            combine_segmentation_maps(&[seg(&a), seg(&b)], ObjectMaskPolicy::Intersection).unwrap();
        assert!(masks.intersection.is_blank());
        assert!(masks.used_union_fallback);
        assert_eq!(masks.object, a.union(&b));
    }

    #[test]
    fn test_all_blank_maps_are_degenerate() {
        let blank = Mask::empty(10, 10);
        let err = combine_segmentation_maps(&[seg(&blank), seg(&blank)], ObjectMaskPolicy::Union)
            .unwrap_err();
        assert!(matches!(err, Error::DegenerateMask));
        assert!(matches!(
            combine_segmentation_maps(&[], ObjectMaskPolicy::Union),
            Err(Error::DegenerateMask)
        ));
    }

    #[test]
    fn test_blank_map_does_not_empty_the_intersection() {
        let a = block(2, 2, 4);
        let b = block(3, 3, 4);
        let masks = combine_segmentation_maps(
            &[seg(&a), seg(&Mask::empty(10, 10)), seg(&b)],
            ObjectMaskPolicy::Intersection,
        )
        .unwrap();
        assert_eq!(masks.intersection, a.intersection(&b));
        assert!(!masks.used_union_fallback);
    }

    #[test]
    fn test_single_map() {
        let a = block(3, 3, 2);
        let masks = combine_segmentation_maps(&[seg(&a)], ObjectMaskPolicy::Intersection).unwrap();
        assert_eq!(masks.union, a);
        assert_eq!(masks.intersection, a);
        assert_eq!(masks.sky, a.complement());
    }

    #[test]
    fn test_neighbours_are_excluded_from_sky() {
        let target = block(4, 4, 2);
        let neighbour = block(0, 0, 2);
        let with_neighbour = Segmentation {
            detections: target.union(&neighbour),
            object: target.clone(),
        };
        let masks =
            combine_segmentation_maps(&[with_neighbour, seg(&target)], ObjectMaskPolicy::Union)
                .unwrap();

        assert_eq!(masks.object, target);
        assert!(!masks.sky.get(0, 0));
        assert!(!masks.object.get(0, 0));
        assert_eq!(masks.sky.count(), 100 - 4 - 4);
    }

    #[test]
    fn test_detections_of_a_map_without_target_still_mask_sky() {
        let target = block(4, 4, 2);
        let missed = Segmentation {
            detections: block(7, 7, 3),
            object: Mask::empty(10, 10),
        };
        let masks =
            combine_segmentation_maps(&[seg(&target), missed], ObjectMaskPolicy::Intersection)
                .unwrap();

        assert_eq!(masks.intersection, target);
        assert!(!masks.sky.get(8, 8));
        assert_eq!(masks.sky.count(), 100 - 4 - 9);
    }

    #[test]
    fn test_aperture_complement_sky() {
        // 0.2 arcsec pixels, 0.4 arcsec radius -> 2 px disc: 13 pixels
        let masks = aperture_masks(11, 11, (5.0, 5.0), 0.4, 0.2, SkyRegion::Complement).unwrap();
        assert_eq!(masks.radius_px, 2.0);
        assert_eq!(masks.object.count(), 13);
        assert_eq!(masks.sky.count(), 121 - 13);
        assert!(!masks.object.overlaps(&masks.sky));
    }

    #[test]
    fn test_aperture_annulus_sky() {
        let masks = aperture_masks(
            21,
            21,
            (10.0, 10.0),
            0.4,
            0.2,
            SkyRegion::Annulus {
                inner: 1.0,
                outer: 1.6,
            },
        )
        .unwrap();
        assert!(masks.sky.count() > 0);
        assert!(!masks.sky.get(10, 10));
        assert!(!masks.sky.get(0, 0));
        // Ring spans 5..8 px from the centre
        assert!(masks.sky.get(17, 10));
        assert!(!masks.sky.get(19, 10));
        assert!(!masks.sky.get(14, 10));
        assert!(!masks.object.overlaps(&masks.sky));
    }

    #[test]
    fn test_aperture_off_grid_is_empty_mask_error() {
        let err = aperture_masks(5, 5, (50.0, 50.0), 0.2, 0.2, SkyRegion::Complement).unwrap_err();
        assert!(matches!(err, Error::EmptyMask { what: "aperture" }));
    }

    #[test]
    fn test_mask_image_round_trip() {
        let wcs = Wcs::from_scale_rotation((1.0, 1.0), (0.0, 0.0), 0.2, 0.0);
        let mask = block(1, 1, 3);
        let image = mask.to_image(&wcs);
        assert_eq!(image.data.sum(), 9.0);
        assert_eq!(Mask::from_image(&image), mask);
    }
}
