//! In-memory datacubes and 2-D images with their coordinate systems.

pub mod fits;
pub mod wcs;

#[cfg(test)]
mod tests;

use common::buffer2::Buffer2;

pub use wcs::{SpectralAxis, Wcs};

/// Dimensions of a datacube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeShape {
    pub nwave: usize,
    pub height: usize,
    pub width: usize,
}

impl CubeShape {
    pub fn new(nwave: usize, height: usize, width: usize) -> Self {
        Self {
            nwave,
            height,
            width,
        }
    }

    /// Pixels in one wavelength plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nwave * self.plane_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flux (and optional variance) sampled on `[wave][y][x]`.
///
/// NaN flux marks pixels without data; they are ignored by every reduction.
#[derive(Debug, Clone)]
pub struct Cube {
    shape: CubeShape,
    flux: Vec<f32>,
    var: Option<Vec<f32>>,
    pub wcs: Wcs,
    pub wave: SpectralAxis,
}

impl Cube {
    pub fn new(
        shape: CubeShape,
        flux: Vec<f32>,
        var: Option<Vec<f32>>,
        wcs: Wcs,
        wave: SpectralAxis,
    ) -> Self {
        assert_eq!(flux.len(), shape.len(), "flux length must match cube shape");
        if let Some(var) = &var {
            assert_eq!(var.len(), shape.len(), "variance length must match cube shape");
        }
        Self {
            shape,
            flux,
            var,
            wcs,
            wave,
        }
    }

    #[inline]
    pub fn shape(&self) -> CubeShape {
        self.shape
    }

    #[inline]
    pub fn flux(&self) -> &[f32] {
        &self.flux
    }

    #[inline]
    pub fn var(&self) -> Option<&[f32]> {
        self.var.as_deref()
    }

    /// Flux of wavelength plane `k`, row-major.
    #[inline]
    pub fn plane(&self, k: usize) -> &[f32] {
        let n = self.shape.plane_len();
        &self.flux[k * n..(k + 1) * n]
    }

    #[inline]
    pub fn var_plane(&self, k: usize) -> Option<&[f32]> {
        let n = self.shape.plane_len();
        self.var.as_ref().map(|v| &v[k * n..(k + 1) * n])
    }

    /// Flux spectrum of spaxel `(x, y)`.
    pub fn spaxel(&self, x: usize, y: usize) -> Vec<f32> {
        let n = self.shape.plane_len();
        let offset = y * self.shape.width + x;
        (0..self.shape.nwave).map(|k| self.flux[k * n + offset]).collect()
    }

    /// Same geometry and variance with new flux values.
    pub fn with_flux(&self, flux: Vec<f32>) -> Self {
        Self::new(
            self.shape,
            flux,
            self.var.clone(),
            self.wcs.clone(),
            self.wave.clone(),
        )
    }

    /// Spatial sub-cube with top-left pixel `(x0, y0)`; the WCS follows.
    ///
    /// # Panics
    /// Panics if the window does not fit inside the cube.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        assert!(
            x0 + width <= self.shape.width && y0 + height <= self.shape.height,
            "crop window {width}x{height}+{x0}+{y0} exceeds {}x{} cube",
            self.shape.width,
            self.shape.height
        );
        let crop_planes = |data: &[f32]| {
            let mut out = Vec::with_capacity(self.shape.nwave * width * height);
            for plane in data.chunks_exact(self.shape.plane_len()) {
                for y in y0..y0 + height {
                    let start = y * self.shape.width + x0;
                    out.extend_from_slice(&plane[start..start + width]);
                }
            }
            out
        };
        Self::new(
            CubeShape::new(self.shape.nwave, height, width),
            crop_planes(&self.flux),
            self.var.as_deref().map(crop_planes),
            self.wcs.shifted(x0, y0),
            self.wave.clone(),
        )
    }

    /// Broadband image: NaN-aware mean over wavelength of every spaxel.
    pub fn white_light(&self) -> Image {
        let n = self.shape.plane_len();
        let mut sum = vec![0.0f64; n];
        let mut count = vec![0u32; n];
        for plane in self.flux.chunks_exact(n) {
            for (i, &v) in plane.iter().enumerate() {
                if v.is_finite() {
                    sum[i] += v as f64;
                    count[i] += 1;
                }
            }
        }
        let pixels = sum
            .into_iter()
            .zip(count)
            .map(|(s, c)| if c == 0 { f32::NAN } else { (s / c as f64) as f32 })
            .collect();
        Image::new(
            Buffer2::new(self.shape.width, self.shape.height, pixels),
            self.wcs.clone(),
        )
    }
}

/// A 2-D image on its own sky grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data: Buffer2<f32>,
    pub wcs: Wcs,
}

impl Image {
    pub fn new(data: Buffer2<f32>, wcs: Wcs) -> Self {
        Self { data, wcs }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.data.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        Self::new(
            self.data.crop(x0, y0, width, height),
            self.wcs.shifted(x0, y0),
        )
    }

    /// Nearest-neighbour resample onto a `width x height` grid described by
    /// `target`. Target pixels that land outside this image, or that have no
    /// finite position in it, become 0.
    pub fn resample_onto(&self, target: &Wcs, width: usize, height: usize) -> Self {
        let data = Buffer2::from_fn(width, height, |x, y| {
            let (ra, dec) = target.pixel_to_sky(x as f64, y as f64);
            let (sx, sy) = self.wcs.sky_to_pixel(ra, dec);
            let (sx, sy) = (sx.round(), sy.round());
            let outside = !sx.is_finite()
                || !sy.is_finite()
                || sx < 0.0
                || sy < 0.0
                || sx >= self.width() as f64
                || sy >= self.height() as f64;
            if outside {
                0.0
            } else {
                self.data[(sx as usize, sy as usize)]
            }
        });
        Self::new(data, target.clone())
    }
}
