//! Dense sliding-window matching.
//!
//! The raster pair is tiled into blocks; each block is matched point by
//! point through the correlation engine, seeded by a single global
//! homography. A fresh local homography is refitted per block so spatially
//! varying distortion that a single projective model cannot express still
//! produces clean inlier sets. Inlier displacements are splatted into dense
//! per-pixel maps with Gaussian-decaying weights and normalized at the end.

use landmark_raster::{NoDataMask, PixelValue, Raster, RasterSize};

use crate::correlation::{match_point, PointMatch};
use crate::error::RegisterError;
use crate::geometry::MapGeometry;
use crate::homography::{apply_homography, homography_ransac, reprojection_error};
use crate::params::{MatchParams, RansacParams, SlidingParams};

/// Dense per-pixel outputs of a sliding-window comparison.
///
/// All four arrays are parallel to the base raster, NaN-initialized; a pixel
/// stays NaN when no feature's influence window covered it.
#[derive(Debug, Clone)]
pub struct CorrelationMaps {
    /// Per-pixel x displacement in the 3D frame.
    pub delta_x: Vec<f32>,
    /// Per-pixel y displacement in the 3D frame.
    pub delta_y: Vec<f32>,
    /// Per-pixel z displacement in the 3D frame.
    pub delta_z: Vec<f32>,
    /// Per-pixel correlation strength of the contributing features.
    pub correlation: Vec<f32>,
    /// Size of the maps in pixels.
    pub size: RasterSize,
}

impl CorrelationMaps {
    fn new(size: RasterSize) -> Self {
        let n = size.num_pixels();
        Self {
            delta_x: vec![f32::NAN; n],
            delta_y: vec![f32::NAN; n],
            delta_z: vec![f32::NAN; n],
            correlation: vec![f32::NAN; n],
            size,
        }
    }
}

/// Sliding-window dense matcher between a base and a child raster.
#[derive(Debug, Clone)]
pub struct SlidingWindowMatcher {
    /// Block tiling and splatting parameters.
    pub params: SlidingParams,
    /// Per-point correlation parameters.
    pub match_params: MatchParams,
    /// RANSAC parameters for the per-block local homography.
    pub ransac: RansacParams,
}

impl SlidingWindowMatcher {
    /// Create a matcher from its parameter groups.
    pub fn new(params: SlidingParams, match_params: MatchParams, ransac: RansacParams) -> Self {
        Self {
            params,
            match_params,
            ransac,
        }
    }

    /// Produce dense displacement and correlation maps between the rasters.
    ///
    /// `seed` is the approximate global homography carrying base pixels into
    /// child pixels; it bounds each point's search window. Geometry handles
    /// lift matched pixels into the shared 3D frame where displacements are
    /// measured.
    pub fn run<T: PixelValue>(
        &self,
        base: &Raster<T>,
        base_mask: &NoDataMask,
        child: &Raster<T>,
        child_mask: &NoDataMask,
        seed: &[[f64; 3]; 3],
        base_geometry: &impl MapGeometry,
        child_geometry: &impl MapGeometry,
    ) -> Result<CorrelationMaps, RegisterError> {
        if base.size() != base_mask.size() {
            return Err(RegisterError::Raster(
                landmark_raster::RasterError::SizeMismatch(
                    base.size().to_string(),
                    base_mask.size().to_string(),
                ),
            ));
        }
        if child.size() != child_mask.size() {
            return Err(RegisterError::Raster(
                landmark_raster::RasterError::SizeMismatch(
                    child.size().to_string(),
                    child_mask.size().to_string(),
                ),
            ));
        }

        let size = base.size();
        let mut maps = CorrelationMaps::new(size);
        let mut weights = vec![f64::NAN; size.num_pixels()];

        let block = self.params.block_size.max(1);
        for block_row in (0..size.height).step_by(block) {
            for block_col in (0..size.width).step_by(block) {
                let matches = self.match_block(
                    base, base_mask, child, child_mask, seed, block_col, block_row,
                );

                if matches.len() <= self.params.min_block_matches {
                    log::debug!(
                        "block ({block_col}, {block_row}): {} matches, skipped",
                        matches.len()
                    );
                    continue;
                }

                self.splat_block(
                    &matches,
                    base_geometry,
                    child_geometry,
                    &mut maps,
                    &mut weights,
                );
            }
        }

        normalize_maps(&mut maps, &weights, self.params.max_delta);
        Ok(maps)
    }

    /// Correlate the sampled sub-grid of one block.
    fn match_block<T: PixelValue>(
        &self,
        base: &Raster<T>,
        base_mask: &NoDataMask,
        child: &Raster<T>,
        child_mask: &NoDataMask,
        seed: &[[f64; 3]; 3],
        block_col: usize,
        block_row: usize,
    ) -> Vec<PointMatch> {
        let size = base.size();
        let row_end = (block_row + self.params.block_size).min(size.height);
        let col_end = (block_col + self.params.block_size).min(size.width);
        let step = self.params.step.max(1);

        let template_half = (self.match_params.template_size / 2) as i64;
        let search_half = (self.match_params.search_size / 2) as i64;

        let mut matches = Vec::new();
        for row in (block_row..row_end).step_by(step) {
            for col in (block_col..col_end).step_by(step) {
                let frac = base_mask.invalid_fraction(col as i64, row as i64, template_half);
                if frac > self.params.max_nodata_fraction {
                    continue;
                }

                let predicted = match apply_homography(seed, &[col as f64, row as f64]) {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let pred_col = predicted[0].round() as i64;
                let pred_row = predicted[1].round() as i64;
                let frac = child_mask.invalid_fraction(pred_col, pred_row, search_half);
                if frac > self.params.max_nodata_fraction {
                    continue;
                }

                if let Some(m) = match_point(
                    base,
                    child,
                    [col as i64, row as i64],
                    predicted,
                    &self.match_params,
                ) {
                    matches.push(m);
                }
            }
        }
        matches
    }

    /// Refit a local homography over one block's matches and splat the
    /// inlier displacements.
    fn splat_block(
        &self,
        matches: &[PointMatch],
        base_geometry: &impl MapGeometry,
        child_geometry: &impl MapGeometry,
        maps: &mut CorrelationMaps,
        weights: &mut [f64],
    ) {
        let base_pts: Vec<[f64; 2]> = matches.iter().map(|m| m.base_point).collect();
        let child_pts: Vec<[f64; 2]> = matches.iter().map(|m| m.child_point).collect();

        let local = match homography_ransac(&base_pts, &child_pts, &self.ransac) {
            Ok(result) => result.homography,
            Err(err) => {
                log::debug!("local homography fit failed: {err}");
                return;
            }
        };

        for m in matches {
            let err = match reprojection_error(&local, &m.base_point, &m.child_point) {
                Ok(err) => err,
                Err(_) => continue,
            };
            if err >= self.params.reproj_threshold {
                continue;
            }

            let (Some(base_world), Some(child_world)) = (
                base_geometry.pixel_to_world(m.base_point[0], m.base_point[1]),
                child_geometry.pixel_to_world(m.child_point[0], m.child_point[1]),
            ) else {
                continue;
            };

            let delta = [
                child_world[0] - base_world[0],
                child_world[1] - base_world[1],
                child_world[2] - base_world[2],
            ];
            self.splat_feature(m, &delta, maps, weights);
        }
    }

    /// Spread one inlier's displacement over its influence window.
    fn splat_feature(
        &self,
        m: &PointMatch,
        delta: &[f64; 3],
        maps: &mut CorrelationMaps,
        weights: &mut [f64],
    ) {
        let size = maps.size;
        let radius = self.params.influence_radius as i64;
        let center_col = m.base_point[0].round() as i64;
        let center_row = m.base_point[1].round() as i64;

        for row in (center_row - radius)..=(center_row + radius) {
            if row < 0 || row >= size.height as i64 {
                continue;
            }
            for col in (center_col - radius)..=(center_col + radius) {
                if col < 0 || col >= size.width as i64 {
                    continue;
                }
                let dc = col as f64 - m.base_point[0];
                let dr = row as f64 - m.base_point[1];
                let weight = (-(dc * dc + dr * dr).sqrt()).exp();

                let idx = row as usize * size.width + col as usize;
                if weights[idx].is_nan() {
                    weights[idx] = weight;
                    maps.delta_x[idx] = (weight * delta[0]) as f32;
                    maps.delta_y[idx] = (weight * delta[1]) as f32;
                    maps.delta_z[idx] = (weight * delta[2]) as f32;
                    maps.correlation[idx] = (weight * m.correlation) as f32;
                } else {
                    weights[idx] += weight;
                    maps.delta_x[idx] += (weight * delta[0]) as f32;
                    maps.delta_y[idx] += (weight * delta[1]) as f32;
                    maps.delta_z[idx] += (weight * delta[2]) as f32;
                    maps.correlation[idx] += (weight * m.correlation) as f32;
                }
            }
        }
    }
}

/// Normalize accumulated splats by their weights and reset outliers.
///
/// Pixels without any contribution (zero or NaN weight) become NaN in all
/// four maps, as do pixels whose displacement exceeds `max_delta` on any
/// axis.
fn normalize_maps(maps: &mut CorrelationMaps, weights: &[f64], max_delta: f64) {
    for idx in 0..weights.len() {
        let w = weights[idx];
        if !(w > 0.0) {
            maps.delta_x[idx] = f32::NAN;
            maps.delta_y[idx] = f32::NAN;
            maps.delta_z[idx] = f32::NAN;
            maps.correlation[idx] = f32::NAN;
            continue;
        }
        let w = w as f32;
        maps.delta_x[idx] /= w;
        maps.delta_y[idx] /= w;
        maps.delta_z[idx] /= w;
        maps.correlation[idx] /= w;

        if maps.delta_x[idx].abs() > max_delta as f32
            || maps.delta_y[idx].abs() > max_delta as f32
            || maps.delta_z[idx].abs() > max_delta as f32
        {
            maps.delta_x[idx] = f32::NAN;
            maps.delta_y[idx] = f32::NAN;
            maps.delta_z[idx] = f32::NAN;
            maps.correlation[idx] = f32::NAN;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarGeometry;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    /// Textured synthetic surface with enough local variance to correlate.
    fn terrain(width: usize, height: usize, shift: f64) -> Raster<f32> {
        Raster::from_fn(RasterSize { width, height }, |c, r| {
            let x = c as f64 + shift;
            let y = r as f64;
            (128.0
                + 60.0 * (x * 0.35).sin() * (y * 0.23).cos()
                + 40.0 * (x * 0.11 + y * 0.17).sin()) as f32
        })
    }

    fn elevation(width: usize, height: usize) -> Raster<f32> {
        Raster::from_fn(RasterSize { width, height }, |c, r| {
            ((c as f64 * 0.05).sin() * 10.0 + (r as f64 * 0.07).cos() * 8.0) as f32
        })
    }

    fn test_matcher() -> SlidingWindowMatcher {
        SlidingWindowMatcher::new(
            SlidingParams {
                block_size: 64,
                step: 4,
                min_block_matches: 20,
                influence_radius: 6,
                reproj_threshold: 2.0,
                max_delta: 10.0,
                max_nodata_fraction: 0.25,
            },
            MatchParams {
                template_size: 9,
                search_size: 17,
                min_correlation: 0.2,
            },
            RansacParams {
                max_iterations: 100,
                inlier_threshold: 1.0,
                random_seed: Some(11),
            },
        )
    }

    #[test]
    fn test_identical_rasters_give_zero_displacement() -> Result<(), RegisterError> {
        let (w, h) = (96, 96);
        let base = terrain(w, h, 0.0);
        let elev = elevation(w, h);
        let mask = NoDataMask::all_valid(base.size());
        let geom = PlanarGeometry::new(1.0, &elev, &mask);

        let maps = test_matcher().run(&base, &mask, &base, &mask, &IDENTITY, &geom, &geom)?;

        let mut covered = 0usize;
        for idx in 0..maps.size.num_pixels() {
            let dx = maps.delta_x[idx];
            if dx.is_nan() {
                // NaN pixels are NaN across all four maps
                assert!(maps.delta_y[idx].is_nan());
                assert!(maps.delta_z[idx].is_nan());
                assert!(maps.correlation[idx].is_nan());
                continue;
            }
            covered += 1;
            assert!(maps.delta_y[idx].is_finite());
            assert!(maps.delta_z[idx].is_finite());
            assert!(maps.correlation[idx].is_finite());
            assert!(dx.abs() < 0.5, "dx = {dx}");
            assert!(maps.delta_y[idx].abs() < 0.5);
            assert!(maps.correlation[idx] > 0.5);
        }
        assert!(covered > 0, "no pixel received a contribution");
        Ok(())
    }

    #[test]
    fn test_constant_shift_recovered() -> Result<(), RegisterError> {
        let (w, h) = (96, 96);
        let base = terrain(w, h, 0.0);
        // child sampled 3 pixels to the right of base
        let child = terrain(w, h, 3.0);
        let elev = elevation(w, h);
        let mask = NoDataMask::all_valid(base.size());
        let geom = PlanarGeometry::new(1.0, &elev, &mask);

        let maps = test_matcher().run(&base, &mask, &child, &mask, &IDENTITY, &geom, &geom)?;

        let finite: Vec<f32> = maps
            .delta_x
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        assert!(!finite.is_empty());
        let mean = finite.iter().sum::<f32>() / finite.len() as f32;
        // base pixel (c, r) matches child pixel (c - 3, r)
        assert!((mean + 3.0).abs() < 0.5, "mean dx = {mean}");
        Ok(())
    }

    #[test]
    fn test_too_few_matches_leaves_maps_nan() -> Result<(), RegisterError> {
        let (w, h) = (96, 96);
        let base = terrain(w, h, 0.0);
        let elev = elevation(w, h);
        let mask = NoDataMask::all_valid(base.size());
        let geom = PlanarGeometry::new(1.0, &elev, &mask);

        let mut matcher = test_matcher();
        matcher.params.min_block_matches = 100_000;
        let maps = matcher.run(&base, &mask, &base, &mask, &IDENTITY, &geom, &geom)?;
        assert!(maps.delta_x.iter().all(|v| v.is_nan()));
        assert!(maps.correlation.iter().all(|v| v.is_nan()));
        Ok(())
    }

    #[test]
    fn test_mask_size_mismatch() {
        let base = terrain(32, 32, 0.0);
        let elev = elevation(32, 32);
        let good_mask = NoDataMask::all_valid(base.size());
        let bad_mask = NoDataMask::all_valid(RasterSize {
            width: 16,
            height: 16,
        });
        let geom = PlanarGeometry::new(1.0, &elev, &good_mask);
        let result =
            test_matcher().run(&base, &bad_mask, &base, &good_mask, &IDENTITY, &geom, &geom);
        assert!(result.is_err());
    }
}
