//! Error types for the canvas layer

use crate::point::Point;

/// Canvas model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanvasError {
    /// Quantization attempted before the palette handshake completed
    #[error("palette is empty: handshake has not completed")]
    EmptyPalette,

    /// The same palette index was supplied twice
    #[error("duplicate palette index: {0}")]
    DuplicatePaletteIndex(u8),

    /// Point not covered by any configured tile
    #[error("point {point} is outside every configured tile")]
    OutOfBounds {
        /// The offending global point
        point: Point,
    },

    /// Tile id not present in the layout
    #[error("unknown tile: {0}")]
    UnknownTile(u32),

    /// Tile layout rejected at construction
    #[error("malformed tile layout: {0}")]
    MalformedLayout(String),

    /// Coordinates leave the `i32` range
    #[error("coordinate overflow: {0}")]
    CoordinateOverflow(String),

    /// Colour code could not be parsed
    #[error("invalid hex colour: {0:?}")]
    InvalidHex(String),

    /// Pixel buffer does not match the declared dimensions
    #[error("image is {width}x{height} but holds {actual} pixels")]
    ImageDimensions {
        /// Declared width
        width: u32,
        /// Declared height
        height: u32,
        /// Pixels actually supplied
        actual: usize,
    },
}

impl CanvasError {
    /// Whether this error invalidates startup configuration
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyPalette
                | Self::DuplicatePaletteIndex(_)
                | Self::MalformedLayout(_)
                | Self::InvalidHex(_)
                | Self::CoordinateOverflow(_)
                | Self::ImageDimensions { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_error_display() {
        let err = CanvasError::OutOfBounds {
            point: Point::new(4000, 0),
        };
        assert!(err.to_string().contains("(4000, 0)"));
    }

    #[test]
    fn canvas_error_is_configuration() {
        assert!(CanvasError::EmptyPalette.is_configuration());
        assert!(CanvasError::MalformedLayout("x".into()).is_configuration());
        assert!(CanvasError::CoordinateOverflow("x".into()).is_configuration());
        assert!(!CanvasError::UnknownTile(9).is_configuration());
        assert!(!CanvasError::OutOfBounds {
            point: Point::new(0, 0)
        }
        .is_configuration());
    }
}
