//! RGB colour value

use crate::error::CanvasError;
use serde::{Deserialize, Serialize};

/// 8-bit RGB colour; equality is exact channel equality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
}

impl Color {
    /// Create new colour
    #[inline]
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a `#RRGGBB` or `RRGGBB` code
    ///
    /// # Errors
    /// `CanvasError::InvalidHex` if the code is not six hex digits
    pub fn from_hex(code: &str) -> Result<Self, CanvasError> {
        let digits = code.strip_prefix('#').unwrap_or(code);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(CanvasError::InvalidHex(code.to_string()));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| CanvasError::InvalidHex(code.to_string()))
        };

        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    /// Format as `#RRGGBB`
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Squared Euclidean distance in RGB space
    #[inline]
    #[must_use]
    pub fn distance_sq(&self, other: &Color) -> u32 {
        let dr = i32::from(self.r) - i32::from(other.r);
        let dg = i32::from(self.g) - i32::from(other.g);
        let db = i32::from(self.b) - i32::from(other.b);
        (dr * dr + dg * dg + db * db).unsigned_abs()
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_from_hex() {
        assert_eq!(Color::from_hex("#FF4500").unwrap(), Color::new(255, 69, 0));
        assert_eq!(Color::from_hex("00a368").unwrap(), Color::new(0, 163, 104));
    }

    #[test]
    fn color_from_hex_rejects_garbage() {
        assert!(Color::from_hex("#FFF").is_err());
        assert!(Color::from_hex("#GG0000").is_err());
        assert!(Color::from_hex("#ÿÿÿ").is_err());
    }

    #[test]
    fn color_hex_display() {
        assert_eq!(Color::new(109, 0, 26).to_string(), "#6D001A");
    }

    #[test]
    fn color_distance_does_not_wrap() {
        let black = Color::new(0, 0, 0);
        let white = Color::new(255, 255, 255);
        assert_eq!(black.distance_sq(&white), 3 * 255 * 255);
        assert_eq!(white.distance_sq(&black), 3 * 255 * 255);
        assert_eq!(white.distance_sq(&white), 0);
    }
}
