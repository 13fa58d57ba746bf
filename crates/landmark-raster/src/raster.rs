use crate::error::RasterError;

/// Raster size in pixels
///
/// A struct to represent the size of a raster in pixels.
///
/// # Examples
///
/// ```
/// use landmark_raster::RasterSize;
///
/// let size = RasterSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(size.width, 10);
/// assert_eq!(size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterSize {
    /// Width of the raster in pixels
    pub width: usize,
    /// Height of the raster in pixels
    pub height: usize,
}

impl RasterSize {
    /// Total number of pixels in the raster.
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for RasterSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "RasterSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for RasterSize {
    fn from(size: [usize; 2]) -> Self {
        RasterSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Trait for raster sample types.
pub trait PixelValue: Copy + Default + Into<f64> {
    /// Convert a f64 value to the sample type.
    fn from_f64(x: f64) -> Self;
}

impl PixelValue for f32 {
    fn from_f64(x: f64) -> Self {
        x as f32
    }
}

impl PixelValue for u8 {
    fn from_f64(x: f64) -> Self {
        x.round().clamp(0.0, 255.0) as u8
    }
}

/// A single-channel raster of intensity or elevation samples.
///
/// Stored row-major with shape (H, W). The buffer is owned by the raster;
/// algorithms borrow it read-only for the duration of a call.
#[derive(Clone)]
pub struct Raster<T>
where
    T: PixelValue,
{
    data: Vec<T>,
    size: RasterSize,
}

impl<T> Raster<T>
where
    T: PixelValue,
{
    /// Create a new raster from sample data.
    ///
    /// # Errors
    ///
    /// If the length of the data does not match the raster size, an error is
    /// returned.
    pub fn new(size: RasterSize, data: Vec<T>) -> Result<Self, RasterError> {
        if data.len() != size.num_pixels() {
            return Err(RasterError::InvalidLength(data.len(), size.num_pixels()));
        }
        Ok(Self { data, size })
    }

    /// Create a raster filled with a constant value.
    pub fn from_value(size: RasterSize, value: T) -> Self {
        Self {
            data: vec![value; size.num_pixels()],
            size,
        }
    }

    /// Create a raster by evaluating a function at each (col, row).
    pub fn from_fn(size: RasterSize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(size.num_pixels());
        for row in 0..size.height {
            for col in 0..size.width {
                data.push(f(col, row));
            }
        }
        Self { data, size }
    }

    /// The size of the raster in pixels.
    pub fn size(&self) -> RasterSize {
        self.size
    }

    /// The number of columns of the raster.
    pub fn cols(&self) -> usize {
        self.size.width
    }

    /// The number of rows of the raster.
    pub fn rows(&self) -> usize {
        self.size.height
    }

    /// Bounds-checked sample access at integer coordinates.
    pub fn get(&self, col: usize, row: usize) -> Option<T> {
        if col >= self.size.width || row >= self.size.height {
            return None;
        }
        Some(self.data[row * self.size.width + col])
    }

    /// Sample value as f64 at integer coordinates.
    ///
    /// PRECONDITION: (col, row) is inside the raster.
    pub fn value(&self, col: usize, row: usize) -> f64 {
        self.data[row * self.size.width + col].into()
    }

    /// The raster data as a flat row-major slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// Per-pixel validity mask parallel to a raster.
///
/// A pixel is invalid when its elevation (or intensity) sample carries no
/// data; invalid pixels are excluded from matching and splatting.
#[derive(Clone)]
pub struct NoDataMask {
    data: Vec<bool>,
    size: RasterSize,
}

impl NoDataMask {
    /// Create a mask from per-pixel validity flags.
    pub fn new(size: RasterSize, data: Vec<bool>) -> Result<Self, RasterError> {
        if data.len() != size.num_pixels() {
            return Err(RasterError::InvalidLength(data.len(), size.num_pixels()));
        }
        Ok(Self { data, size })
    }

    /// A mask marking every pixel valid.
    pub fn all_valid(size: RasterSize) -> Self {
        Self {
            data: vec![true; size.num_pixels()],
            size,
        }
    }

    /// Derive a mask from a raster, marking non-finite samples invalid.
    pub fn from_finite(raster: &Raster<f32>) -> Self {
        Self {
            data: raster.as_slice().iter().map(|v| v.is_finite()).collect(),
            size: raster.size(),
        }
    }

    /// The size of the mask in pixels.
    pub fn size(&self) -> RasterSize {
        self.size
    }

    /// Whether the pixel at (col, row) carries valid data.
    ///
    /// Out-of-bounds coordinates are reported invalid.
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        if col >= self.size.width || row >= self.size.height {
            return false;
        }
        self.data[row * self.size.width + col]
    }

    /// The fraction of invalid pixels inside a window centered at (col, row).
    pub fn invalid_fraction(&self, col: i64, row: i64, half: i64) -> f64 {
        let mut invalid = 0usize;
        let mut total = 0usize;
        for r in (row - half)..=(row + half) {
            for c in (col - half)..=(col + half) {
                total += 1;
                if r < 0 || c < 0 || !self.is_valid(c as usize, r as usize) {
                    invalid += 1;
                }
            }
        }
        invalid as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_new() -> Result<(), RasterError> {
        let size = RasterSize {
            width: 4,
            height: 3,
        };
        let raster = Raster::<u8>::new(size, vec![7u8; 12])?;
        assert_eq!(raster.cols(), 4);
        assert_eq!(raster.rows(), 3);
        assert_eq!(raster.get(3, 2), Some(7));
        assert_eq!(raster.get(4, 2), None);
        Ok(())
    }

    #[test]
    fn test_raster_bad_length() {
        let size = RasterSize {
            width: 4,
            height: 3,
        };
        assert!(Raster::<u8>::new(size, vec![0u8; 11]).is_err());
    }

    #[test]
    fn test_raster_from_fn() {
        let size = RasterSize {
            width: 3,
            height: 2,
        };
        let raster = Raster::<f32>::from_fn(size, |c, r| (r * 3 + c) as f32);
        assert_eq!(raster.value(2, 1), 5.0);
    }

    #[test]
    fn test_mask_invalid_fraction() -> Result<(), RasterError> {
        let size = RasterSize {
            width: 3,
            height: 3,
        };
        let mut flags = vec![true; 9];
        flags[4] = false;
        let mask = NoDataMask::new(size, flags)?;
        assert!(mask.is_valid(0, 0));
        assert!(!mask.is_valid(1, 1));
        // center 3x3 window covers the full mask
        let frac = mask.invalid_fraction(1, 1, 1);
        assert!((frac - 1.0 / 9.0).abs() < 1e-12);
        // out-of-bounds pixels count as invalid
        assert!(mask.invalid_fraction(0, 0, 1) > 0.5);
        Ok(())
    }
}
