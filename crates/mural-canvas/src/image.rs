//! Source bitmaps and the quantized target image

use crate::color::Color;
use crate::error::CanvasError;
use crate::palette::Palette;
use crate::point::Point;
use std::collections::BTreeMap;

/// Raw pixel grid as produced by the bitmap decoder (row-major)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
}

impl SourceImage {
    /// Wrap a decoded pixel buffer
    ///
    /// # Errors
    /// `CanvasError::ImageDimensions` if `pixels.len() != width * height`
    pub fn new(width: u32, height: u32, pixels: Vec<Color>) -> Result<Self, CanvasError> {
        let expected = u64::from(width) * u64::from(height);
        if pixels.len() as u64 != expected {
            return Err(CanvasError::ImageDimensions {
                width,
                height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Image filled with one colour
    #[must_use]
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let len = usize::try_from(u64::from(width) * u64::from(height)).unwrap_or(0);
        Self {
            width,
            height,
            pixels: vec![color; len],
        }
    }

    /// Width in pixels
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at `(x, y)`
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = usize::try_from(u64::from(y) * u64::from(self.width) + u64::from(x)).ok()?;
        self.pixels.get(idx).copied()
    }

    /// Pixels with their image-local coordinates
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, Color)> + '_ {
        let width = self.width.max(1);
        (0u32..).zip(self.pixels.iter()).map(move |(i, c)| (i % width, i / width, *c))
    }
}

/// Desired canvas content, quantized and placed in global space
///
/// Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetImage {
    width: u32,
    height: u32,
    origin: Point,
    pixels: BTreeMap<Point, Color>,
}

impl TargetImage {
    /// Quantize every source pixel through `palette` and offset it by `origin`
    ///
    /// # Errors
    /// - `CanvasError::EmptyPalette` if the palette handshake has not happened
    /// - `CanvasError::CoordinateOverflow` if the image would extend past the
    ///   `i32` coordinate range
    pub fn load(source: &SourceImage, origin: Point, palette: &Palette) -> Result<Self, CanvasError> {
        if palette.is_empty() {
            return Err(CanvasError::EmptyPalette);
        }

        let overflow = || {
            CanvasError::CoordinateOverflow(format!(
                "{}x{} image at {}",
                source.width(),
                source.height(),
                origin
            ))
        };
        let mut pixels = BTreeMap::new();
        for (x, y, color) in source.pixels() {
            let entry = palette.nearest(color)?;
            let local = Point::new(
                i32::try_from(x).map_err(|_| overflow())?,
                i32::try_from(y).map_err(|_| overflow())?,
            );
            let global = origin.checked_add(local).ok_or_else(overflow)?;
            pixels.insert(global, entry.color);
        }

        tracing::debug!(
            "Loaded target image {}x{} at {} ({} pixels)",
            source.width(),
            source.height(),
            origin,
            pixels.len()
        );

        Ok(Self {
            width: source.width(),
            height: source.height(),
            origin,
            pixels,
        })
    }

    /// Desired colour at a global point
    #[inline]
    #[must_use]
    pub fn get(&self, point: Point) -> Option<Color> {
        self.pixels.get(&point).copied()
    }

    /// Points and desired colours in point order
    pub fn iter(&self) -> impl Iterator<Item = (Point, Color)> + '_ {
        self.pixels.iter().map(|(p, c)| (*p, *c))
    }

    /// Width in pixels
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Global position of the top-left pixel
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Point {
        self.origin
    }

    /// Number of pixels
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the image is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}
