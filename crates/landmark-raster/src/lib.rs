#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::RasterError;

mod raster;
pub use raster::{NoDataMask, PixelValue, Raster, RasterSize};

/// Sub-pixel sampling of raster buffers.
pub mod interpolation;
