#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::RegisterError;

pub mod correlation;
pub mod geometry;
pub mod homography;
pub mod interest;
pub mod params;
pub mod pipeline;
pub mod rigid;
pub mod sliding;
