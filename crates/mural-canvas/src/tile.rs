//! Tile layout
//!
//! The shared canvas is split into fixed rectangular tiles. Each tile has an
//! offset into *canvas space*; canvas space is global space shifted by the
//! layout's `canvas_origin`, so that the reference layout's global origin
//! sits in the middle of the six tiles:
//!
//! ```text
//!   global x: -1500      -500       500      1500
//!   y -1000   +---------+---------+---------+
//!             |    0    |    1    |    2    |
//!   y     0   +---------+---------+---------+
//!             |    3    |    4    |    5    |
//!   y  1000   +---------+---------+---------+
//! ```

use crate::error::CanvasError;
use crate::point::Point;
use serde::{Deserialize, Serialize};

/// One rectangular tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Tile id used by the remote service
    pub id: u32,
    /// Tile origin in canvas space
    pub offset_x: i32,
    /// Tile origin in canvas space
    pub offset_y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Tile {
    /// Reference tile size
    pub const REFERENCE_SIZE: u32 = 1000;

    /// Create new tile
    #[inline]
    #[must_use]
    pub const fn new(id: u32, offset_x: i32, offset_y: i32, width: u32, height: u32) -> Self {
        Self {
            id,
            offset_x,
            offset_y,
            width,
            height,
        }
    }

    /// Tile origin in canvas space
    #[inline]
    #[must_use]
    pub fn offset(&self) -> Point {
        Point::new(self.offset_x, self.offset_y)
    }

    /// Whether a canvas-space point lies inside this tile
    #[must_use]
    pub fn contains(&self, canvas: Point) -> bool {
        let dx = i64::from(canvas.x) - i64::from(self.offset_x);
        let dy = i64::from(canvas.y) - i64::from(self.offset_y);
        (0..i64::from(self.width)).contains(&dx) && (0..i64::from(self.height)).contains(&dy)
    }

    fn overlaps(&self, other: &Tile) -> bool {
        let (ax0, ay0) = (i64::from(self.offset_x), i64::from(self.offset_y));
        let (ax1, ay1) = (ax0 + i64::from(self.width), ay0 + i64::from(self.height));
        let (bx0, by0) = (i64::from(other.offset_x), i64::from(other.offset_y));
        let (bx1, by1) = (bx0 + i64::from(other.width), by0 + i64::from(other.height));
        ax0 < bx1 && bx0 < ax1 && ay0 < by1 && by0 < ay1
    }
}

/// Reject a tile whose far corner, or whose corners shifted back into global
/// space, leave the `i32` range
fn check_extent(tile: &Tile, canvas_origin: Point) -> Result<(), CanvasError> {
    let fits = |v: i64| i32::try_from(v).is_ok();
    let (x0, y0) = (i64::from(tile.offset_x), i64::from(tile.offset_y));
    let (x1, y1) = (x0 + i64::from(tile.width), y0 + i64::from(tile.height));
    let (ox, oy) = (i64::from(canvas_origin.x), i64::from(canvas_origin.y));
    let inside = [x1, y1, x0 - ox, y0 - oy, x1 - ox, y1 - oy]
        .into_iter()
        .all(fits);
    if inside {
        Ok(())
    } else {
        Err(CanvasError::CoordinateOverflow(format!(
            "tile {} with canvas origin {}",
            tile.id, canvas_origin
        )))
    }
}

/// Static tile table, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLayout {
    tiles: Vec<Tile>,
    canvas_origin: Point,
}

impl TileLayout {
    /// Shift from global space to canvas space in the reference deployment
    pub const REFERENCE_ORIGIN: Point = Point::new(1500, 1000);

    /// Build and validate a layout
    ///
    /// # Errors
    /// - `CanvasError::MalformedLayout` if the table is empty, a tile has zero
    ///   area, ids repeat, or tiles overlap
    /// - `CanvasError::CoordinateOverflow` if a tile, in canvas or global
    ///   space, extends past the `i32` range
    pub fn new(tiles: Vec<Tile>, canvas_origin: Point) -> Result<Self, CanvasError> {
        if tiles.is_empty() {
            return Err(CanvasError::MalformedLayout("no tiles configured".into()));
        }

        for (i, tile) in tiles.iter().enumerate() {
            if tile.width == 0 || tile.height == 0 {
                return Err(CanvasError::MalformedLayout(format!(
                    "tile {} has zero area",
                    tile.id
                )));
            }
            check_extent(tile, canvas_origin)?;
            for other in &tiles[i + 1..] {
                if other.id == tile.id {
                    return Err(CanvasError::MalformedLayout(format!(
                        "duplicate tile id {}",
                        tile.id
                    )));
                }
                if tile.overlaps(other) {
                    return Err(CanvasError::MalformedLayout(format!(
                        "tiles {} and {} overlap",
                        tile.id, other.id
                    )));
                }
            }
        }

        Ok(Self {
            tiles,
            canvas_origin,
        })
    }

    /// The reference six-tile, 3x2 layout of 1000x1000 tiles
    #[must_use]
    pub fn reference() -> Self {
        let size = Tile::REFERENCE_SIZE;
        let step = 1000;
        let tiles = (0u32..6)
            .map(|id| {
                let column = i32::try_from(id % 3).unwrap_or_default();
                let row = i32::try_from(id / 3).unwrap_or_default();
                Tile::new(id, column * step, row * step, size, size)
            })
            .collect();
        Self {
            tiles,
            canvas_origin: Self::REFERENCE_ORIGIN,
        }
    }

    /// Find the tile containing `global` and translate into its local space
    ///
    /// # Errors
    /// `CanvasError::OutOfBounds` if no tile contains the point
    pub fn map_to_tile(&self, global: Point) -> Result<(u32, Point), CanvasError> {
        let canvas = global
            .checked_add(self.canvas_origin)
            .ok_or(CanvasError::OutOfBounds { point: global })?;
        self.tiles
            .iter()
            .find(|t| t.contains(canvas))
            .map(|t| (t.id, canvas - t.offset()))
            .ok_or(CanvasError::OutOfBounds { point: global })
    }

    /// Inverse of [`map_to_tile`](Self::map_to_tile)
    ///
    /// # Errors
    /// `UnknownTile` for an unconfigured id, `OutOfBounds` if `local` falls
    /// outside the tile
    pub fn to_global(&self, tile_id: u32, local: Point) -> Result<Point, CanvasError> {
        let tile = self.tile(tile_id).ok_or(CanvasError::UnknownTile(tile_id))?;
        let out_of_bounds = || CanvasError::OutOfBounds {
            point: local.checked_sub(self.canvas_origin).unwrap_or(local),
        };
        let canvas = local.checked_add(tile.offset()).ok_or_else(out_of_bounds)?;
        if !tile.contains(canvas) {
            return Err(out_of_bounds());
        }
        canvas.checked_sub(self.canvas_origin).ok_or_else(out_of_bounds)
    }

    /// Whether any tile contains `global`
    #[inline]
    #[must_use]
    pub fn contains(&self, global: Point) -> bool {
        self.map_to_tile(global).is_ok()
    }

    /// Tile by id
    #[must_use]
    pub fn tile(&self, id: u32) -> Option<&Tile> {
        self.tiles.iter().find(|t| t.id == id)
    }

    /// All tiles in configuration order
    #[inline]
    #[must_use]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Shift from global space to canvas space
    #[inline]
    #[must_use]
    pub fn canvas_origin(&self) -> Point {
        self.canvas_origin
    }

    /// Number of tiles
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the layout is empty (never true for a validated layout)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl Default for TileLayout {
    fn default() -> Self {
        Self::reference()
    }
}
