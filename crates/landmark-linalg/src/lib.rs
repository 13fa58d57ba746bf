#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// 3x3 matrix and 3-vector operations on plain nested arrays.
pub mod mat3;

/// Rotation estimation from a cross-covariance matrix.
pub mod rotation;
