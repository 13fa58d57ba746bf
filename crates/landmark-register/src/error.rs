use landmark_raster::RasterError;

/// An error type for the registration core.
#[derive(thiserror::Error, Debug)]
pub enum RegisterError {
    /// Error when two parallel point arrays disagree in length.
    #[error("{left_name} length ({left_len}) does not match {right_name} length ({right_len})")]
    MismatchedArrayLengths {
        /// Name of the first array.
        left_name: &'static str,
        /// Length of the first array.
        left_len: usize,
        /// Name of the second array.
        right_name: &'static str,
        /// Length of the second array.
        right_len: usize,
    },

    /// Error when too few correspondences are available for a fit.
    #[error("Insufficient correspondences: required {required}, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the fit.
        required: usize,
        /// Number of correspondences supplied.
        actual: usize,
    },

    /// Error when a robust estimator fails its minimum-inlier gate.
    #[error("Insufficient inliers: required {required}, got {actual}")]
    InsufficientInliers {
        /// Minimum number of inliers required by the gate.
        required: usize,
        /// Number of inliers that survived filtering.
        actual: usize,
    },

    /// Error when feature detection yields no usable points.
    #[error("No usable interest points detected")]
    NoFeatures,

    /// Error when a fitted homography is singular or near-singular.
    #[error("Fitted homography is singular")]
    SingularHomography,

    /// Error when a homogeneous transfer divides by a near-zero w coordinate.
    #[error("Degenerate homogeneous transfer (w is near zero)")]
    DegenerateTransfer,

    /// Error from the underlying raster layer.
    #[error(transparent)]
    Raster(#[from] RasterError),
}
