//! Run-time parameter groups for the registration engine.

use serde::{Deserialize, Serialize};

/// Parameters for the per-point correlation matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchParams {
    /// Side length of the square template patch, in pixels. Must be odd.
    pub template_size: usize,
    /// Side length of the square search region, in pixels. Must be at least
    /// `template_size`.
    pub search_size: usize,
    /// Minimum interpolated correlation value for a match to be kept.
    pub min_correlation: f64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            template_size: 15,
            search_size: 31,
            min_correlation: 0.3,
        }
    }
}

/// Parameters for interest-point selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Neighborhood window size of the interest operator. Even values are
    /// bumped to the next odd value.
    pub window_size: usize,
    /// Minimum Euclidean spacing between accepted features, in pixels.
    pub min_dist: f64,
    /// Maximum number of features to return.
    pub max_features: usize,
    /// Cap on the number of grid cells used for non-maximum suppression;
    /// bounds the downstream sort cost.
    pub grid_cell_cap: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            window_size: 7,
            min_dist: 10.0,
            max_features: 500,
            grid_cell_cap: 10_000,
        }
    }
}

/// Parameters for RANSAC estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansacParams {
    /// Number of sampling iterations. Fixed, not adaptive.
    pub max_iterations: usize,
    /// Residual threshold to classify a correspondence as an inlier. Pixels
    /// for the homography estimator, map-frame units for the rigid estimator.
    pub inlier_threshold: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            inlier_threshold: 2.0,
            random_seed: None,
        }
    }
}

impl RansacParams {
    /// Defaults for the rigid-transform estimator, which needs far fewer
    /// iterations than the homography fit (3-point minimal samples).
    pub fn rigid_defaults() -> Self {
        Self {
            max_iterations: 30,
            inlier_threshold: 2.0,
            random_seed: None,
        }
    }
}

/// Parameters for the sliding-window dense matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingParams {
    /// Side length of each block tile, in pixels.
    pub block_size: usize,
    /// Spacing of the sampled sub-grid within a block, in pixels.
    pub step: usize,
    /// Minimum number of matches in a block before a local homography is
    /// fitted; blocks with fewer contribute nothing.
    pub min_block_matches: usize,
    /// Radius of the influence window over which each inlier's displacement
    /// is splatted, in pixels.
    pub influence_radius: usize,
    /// Maximum reprojection error under the local homography for a match to
    /// count as an inlier, in pixels.
    pub reproj_threshold: f64,
    /// Maximum displacement magnitude per axis in the final dense maps;
    /// pixels exceeding it are reset to NaN.
    pub max_delta: f64,
    /// Maximum fraction of no-data pixels tolerated inside a template or
    /// search window.
    pub max_nodata_fraction: f64,
}

impl Default for SlidingParams {
    fn default() -> Self {
        Self {
            block_size: 256,
            step: 8,
            min_block_matches: 40,
            influence_radius: 10,
            reproj_threshold: 2.0,
            max_delta: 50.0,
            max_nodata_fraction: 0.25,
        }
    }
}

/// Aggregate parameters for the full registration pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Interest-point selection parameters.
    pub detector: DetectorParams,
    /// Per-point matching parameters.
    pub matching: MatchParams,
    /// RANSAC parameters for the global homography fit.
    pub homography_ransac: RansacParams,
    /// RANSAC parameters for the rigid-transform fit.
    pub rigid_ransac: RansacParams,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            detector: DetectorParams::default(),
            matching: MatchParams::default(),
            homography_ransac: RansacParams::default(),
            rigid_ransac: RansacParams::rigid_defaults(),
        }
    }
}

impl RegistrationParams {
    /// Defaults with a fixed random seed for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        let mut params = Self::default();
        params.homography_ransac.random_seed = Some(seed);
        params.rigid_ransac.random_seed = Some(seed);
        params
    }
}
