//! Celestial and spectral coordinate systems of a datacube.
//!
//! Pixel coordinates in this module are 0-based: the centre of the first
//! pixel is `(0.0, 0.0)`. FITS `CRPIX` values are 1-based and are stored as
//! read from the header.

/// Gnomonic (TAN) celestial WCS.
///
/// `(xi, eta) = CD × (x + 1 - CRPIX1, y + 1 - CRPIX2)` in degrees, then
/// de-projected around `CRVAL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel (CRPIX1, CRPIX2), 1-based.
    pub crpix: (f64, f64),
    /// Reference sky position (CRVAL1 = RA, CRVAL2 = Dec) in degrees.
    pub crval: (f64, f64),
    /// [[CD1_1, CD1_2], [CD2_1, CD2_2]] in degrees per pixel.
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Self {
        Self { crpix, crval, cd }
    }

    /// Standard sky-oriented WCS: north up, east left, square pixels of
    /// `pixel_scale` arcsec rotated by `rotation` degrees.
    pub fn from_scale_rotation(
        crpix: (f64, f64),
        crval: (f64, f64),
        pixel_scale: f64,
        rotation: f64,
    ) -> Self {
        let scale_deg = pixel_scale / 3600.0;
        let (sin_r, cos_r) = rotation.to_radians().sin_cos();
        let cd = [
            [-scale_deg * cos_r, scale_deg * sin_r],
            [scale_deg * sin_r, scale_deg * cos_r],
        ];
        Self::new(crpix, crval, cd)
    }

    /// Sky position (RA, Dec in degrees) of a 0-based pixel position.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x + 1.0 - self.crpix.0;
        let dy = y + 1.0 - self.crpix.1;

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval.0.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// 0-based pixel position of a sky position (RA, Dec in degrees).
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (ra - self.crval.0).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let det = self.determinant();
        debug_assert!(det.abs() > 1e-20, "CD matrix is singular (det = {det})");

        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;

        (self.crpix.0 - 1.0 + dx, self.crpix.1 - 1.0 + dy)
    }

    /// Mean pixel scale in arcseconds per pixel.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[0][0].powi(2) + self.cd[1][0].powi(2)).sqrt();
        let scale_y = (self.cd[0][1].powi(2) + self.cd[1][1].powi(2)).sqrt();
        (scale_x + scale_y) * 0.5 * 3600.0
    }

    /// WCS of the sub-grid whose 0-based top-left pixel is `(x0, y0)`.
    pub fn shifted(&self, x0: usize, y0: usize) -> Self {
        Self {
            crpix: (self.crpix.0 - x0 as f64, self.crpix.1 - y0 as f64),
            ..self.clone()
        }
    }

    fn determinant(&self) -> f64 {
        self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0]
    }
}

/// Linear spectral axis: `lambda(k) = CRVAL3 + (k + 1 - CRPIX3) × CDELT3`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralAxis {
    pub crval: f64,
    pub cdelt: f64,
    /// 1-based reference sample.
    pub crpix: f64,
    pub unit: String,
}

impl SpectralAxis {
    pub fn new(crval: f64, cdelt: f64) -> Self {
        Self {
            crval,
            cdelt,
            crpix: 1.0,
            unit: "Angstrom".to_string(),
        }
    }

    /// Wavelength of the 0-based sample `index`.
    pub fn wavelength(&self, index: usize) -> f64 {
        self.crval + (index as f64 + 1.0 - self.crpix) * self.cdelt
    }
}

impl Default for SpectralAxis {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}
