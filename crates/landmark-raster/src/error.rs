/// An error type for the raster module.
#[derive(thiserror::Error, Debug)]
pub enum RasterError {
    /// Error when the data length does not match the raster size.
    #[error("Data length ({0}) does not match the raster size ({1})")]
    InvalidLength(usize, usize),

    /// Error when two co-registered rasters disagree in size.
    #[error("Raster sizes do not match ({0} vs {1})")]
    SizeMismatch(String, String),
}
