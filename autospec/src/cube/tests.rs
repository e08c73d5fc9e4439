use common::buffer2::Buffer2;
use common::float_ext::FloatExt;

use super::*;

fn ramp_cube(nwave: usize, height: usize, width: usize) -> Cube {
    let shape = CubeShape::new(nwave, height, width);
    let flux = (0..shape.len()).map(|i| i as f32).collect();
    let var = Some(vec![1.0; shape.len()]);
    let wcs = Wcs::from_scale_rotation((1.0, 1.0), (150.0, 2.0), 0.2, 0.0);
    Cube::new(shape, flux, var, wcs, SpectralAxis::new(5000.0, 1.25))
}

#[test]
fn test_spaxel_is_strided_across_planes() {
    let cube = ramp_cube(3, 2, 4);
    // plane_len = 8, spaxel (1, 1) -> offset 5
    assert_eq!(cube.spaxel(1, 1), vec![5.0, 13.0, 21.0]);
    assert_eq!(cube.plane(2)[5], 21.0);
}

#[test]
fn test_crop_keeps_every_plane_and_shifts_wcs() {
    let cube = ramp_cube(2, 5, 6);
    let sub = cube.crop(2, 1, 3, 2);
    assert_eq!(sub.shape(), CubeShape::new(2, 2, 3));
    assert_eq!(sub.spaxel(0, 0), cube.spaxel(2, 1));
    assert_eq!(sub.spaxel(2, 1), cube.spaxel(4, 2));
    assert_eq!(sub.var().map(<[f32]>::len), Some(12));

    let (ra, dec) = cube.wcs.pixel_to_sky(4.0, 2.0);
    let (x, y) = sub.wcs.sky_to_pixel(ra, dec);
    assert!(x.approximately_eq_tol(2.0, 1e-9));
    assert!(y.approximately_eq_tol(1.0, 1e-9));
}

#[test]
#[should_panic(expected = "exceeds")]
fn test_crop_outside_panics() {
    ramp_cube(1, 4, 4).crop(3, 0, 2, 2);
}

#[test]
fn test_white_light_skips_nan() {
    let shape = CubeShape::new(3, 1, 2);
    let flux = vec![1.0, f32::NAN, 2.0, f32::NAN, 3.0, f32::NAN];
    let cube = Cube::new(
        shape,
        flux,
        None,
        Wcs::from_scale_rotation((1.0, 1.0), (0.0, 0.0), 1.0, 0.0),
        SpectralAxis::default(),
    );
    let white = cube.white_light();
    assert_eq!(white.data[(0, 0)], 2.0);
    assert!(white.data[(1, 0)].is_nan());
}

#[test]
fn test_resample_onto_finer_grid() {
    let coarse_wcs = Wcs::from_scale_rotation((1.0, 1.0), (150.0, 2.0), 0.4, 0.0);
    let coarse = Image::new(
        Buffer2::from_fn(4, 4, |x, y| (x + 10 * y) as f32),
        coarse_wcs,
    );
    // Half the pixel size, same reference position
    let fine_wcs = Wcs::from_scale_rotation((1.0, 1.0), (150.0, 2.0), 0.2, 0.0);
    let fine = coarse.resample_onto(&fine_wcs, 8, 8);

    assert_eq!(fine.data[(0, 0)], 0.0);
    assert_eq!(fine.data[(2, 0)], 1.0);
    assert_eq!(fine.data[(2, 4)], 21.0);
    assert_eq!(fine.wcs, fine_wcs);
}

#[test]
fn test_resample_without_finite_position_is_zero() {
    let wcs = Wcs::from_scale_rotation((1.0, 1.0), (150.0, 2.0), 0.2, 0.0);
    let image = Image::new(Buffer2::new_filled(3, 3, 5.0), wcs.clone());
    let broken = Wcs::new((1.0, 1.0), (f64::NAN, f64::NAN), wcs.cd);
    let out = image.resample_onto(&broken, 3, 3);
    assert!(out.data.pixels().iter().all(|&v| v == 0.0));
}

#[test]
fn test_resample_outside_source_is_zero() {
    let wcs = Wcs::from_scale_rotation((1.0, 1.0), (150.0, 2.0), 0.2, 0.0);
    let image = Image::new(Buffer2::new_filled(2, 2, 1.0), wcs.clone());
    let target = wcs.shifted(0, 0);
    let out = image.resample_onto(&target, 4, 4);
    assert_eq!(out.data[(1, 1)], 1.0);
    assert_eq!(out.data[(3, 3)], 0.0);
}
