//! Mural Canvas - desired image versus observed canvas
//!
//! The leaf layer of the dispatch pipeline:
//! - Points and colours in global canvas space
//! - Palette handling and nearest-colour quantization
//! - Tile layout (global point -> tile id + tile-local coordinate)
//! - Target image loading and observed-state diffing
//!
//! # Example
//!
//! ```rust,ignore
//! use mural_canvas::{CanvasModel, Palette, SourceImage, TargetImage, TileLayout, Point};
//!
//! let palette = Palette::reference();
//! let target = TargetImage::load(&source, Point::new(-500, -500), &palette)?;
//! let canvas = CanvasModel::new(target, TileLayout::reference());
//!
//! let diff = canvas.compute_diff();
//! ```

#![warn(unreachable_pub)]

pub mod canvas;
pub mod color;
pub mod error;
pub mod image;
pub mod palette;
pub mod point;
pub mod tile;

pub use canvas::{CanvasModel, DiffSet, FrameKind, TilePatch};
pub use color::Color;
pub use error::CanvasError;
pub use image::{SourceImage, TargetImage};
pub use palette::{Palette, PaletteEntry};
pub use point::Point;
pub use tile::{Tile, TileLayout};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
