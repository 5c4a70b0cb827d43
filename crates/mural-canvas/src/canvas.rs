//! Canvas model
//!
//! Holds the read-only target image next to the last observed colour of
//! every target point, and answers the one question the scheduler asks each
//! tick: which points still differ?
//!
//! Observed state sits behind a single `RwLock`. Patches take the write
//! lock for the whole merge, so `compute_diff` (read lock) always sees a
//! consistent snapshot, never a half-applied patch.

use crate::color::Color;
use crate::error::CanvasError;
use crate::image::TargetImage;
use crate::point::Point;
use crate::tile::TileLayout;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;

/// Points whose observed colour differs from the target, with the target colour
pub type DiffSet = BTreeMap<Point, Color>;

/// Kind of inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Complete tile snapshot
    Full,
    /// Changes since the previous frame
    Diff,
}

/// Observed colours for one tile, in tile-local coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePatch {
    /// Frame kind
    pub kind: FrameKind,
    /// Local point and observed colour pairs
    pub pixels: Vec<(Point, Color)>,
}

impl TilePatch {
    /// Full-frame patch
    #[inline]
    #[must_use]
    pub fn full(pixels: Vec<(Point, Color)>) -> Self {
        Self {
            kind: FrameKind::Full,
            pixels,
        }
    }

    /// Diff-frame patch
    #[inline]
    #[must_use]
    pub fn diff(pixels: Vec<(Point, Color)>) -> Self {
        Self {
            kind: FrameKind::Diff,
            pixels,
        }
    }
}

#[derive(Debug, Default)]
struct ObservedCanvas {
    colors: HashMap<Point, Color>,
    tiles_seen: BTreeSet<u32>,
}

/// Target image + observed canvas + tile layout
#[derive(Debug)]
pub struct CanvasModel {
    target: Arc<TargetImage>,
    layout: Arc<TileLayout>,
    required_tiles: BTreeSet<u32>,
    observed: RwLock<ObservedCanvas>,
    ready_tx: watch::Sender<bool>,
}

impl CanvasModel {
    /// Create a model with nothing observed yet
    ///
    /// Target points outside the layout are kept (they always show up in the
    /// diff) but are reported once here; writes to them fail with
    /// `OutOfBounds`.
    #[must_use]
    pub fn new(target: TargetImage, layout: TileLayout) -> Self {
        let mut required_tiles = BTreeSet::new();
        let mut outside = 0usize;
        for (point, _) in target.iter() {
            match layout.map_to_tile(point) {
                Ok((tile, _)) => {
                    required_tiles.insert(tile);
                }
                Err(_) => outside += 1,
            }
        }
        if outside > 0 {
            tracing::warn!("{} target pixels fall outside every configured tile", outside);
        }

        let (ready_tx, _) = watch::channel(required_tiles.is_empty());

        Self {
            target: Arc::new(target),
            layout: Arc::new(layout),
            required_tiles,
            observed: RwLock::new(ObservedCanvas::default()),
            ready_tx,
        }
    }

    /// Merge an inbound patch for `tile_id`
    ///
    /// Last write wins per point; re-applying a patch is a no-op. Points
    /// outside the target footprint are not retained. Returns the number of
    /// target points whose observed colour was written.
    ///
    /// # Errors
    /// `CanvasError::UnknownTile` if the layout has no such tile
    pub fn apply_diff_event(&self, tile_id: u32, patch: &TilePatch) -> Result<usize, CanvasError> {
        if self.layout.tile(tile_id).is_none() {
            return Err(CanvasError::UnknownTile(tile_id));
        }

        let mut written = 0usize;
        let mut dropped = 0usize;
        let became_ready = {
            let mut observed = self.observed.write();
            for (local, color) in &patch.pixels {
                let Ok(global) = self.layout.to_global(tile_id, *local) else {
                    dropped += 1;
                    continue;
                };
                if self.target.get(global).is_some() {
                    observed.colors.insert(global, *color);
                    written += 1;
                }
            }

            let newly_seen = observed.tiles_seen.insert(tile_id);
            newly_seen && self.required_tiles.is_subset(&observed.tiles_seen)
        };

        if dropped > 0 {
            tracing::debug!("Tile {}: dropped {} out-of-tile pixels", tile_id, dropped);
        }
        if became_ready {
            tracing::info!("Observed canvas ready ({} tiles)", self.required_tiles.len());
            self.ready_tx.send_replace(true);
        }

        Ok(written)
    }

    /// Every target point whose observed colour is absent or different
    #[must_use]
    pub fn compute_diff(&self) -> DiffSet {
        let observed = self.observed.read();
        self.target
            .iter()
            .filter(|(point, color)| observed.colors.get(point) != Some(color))
            .collect()
    }

    /// Tile id and tile-local coordinate of a global point
    ///
    /// # Errors
    /// `CanvasError::OutOfBounds` if no tile contains the point
    #[inline]
    pub fn map_to_tile(&self, global: Point) -> Result<(u32, Point), CanvasError> {
        self.layout.map_to_tile(global)
    }

    /// Last observed colour at a global point
    #[must_use]
    pub fn observed(&self, point: Point) -> Option<Color> {
        self.observed.read().colors.get(&point).copied()
    }

    /// Whether every tile under the target has delivered a frame
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Wait until every tile under the target has delivered a frame
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Tiles the target image touches
    #[inline]
    #[must_use]
    pub fn required_tiles(&self) -> &BTreeSet<u32> {
        &self.required_tiles
    }

    /// Target image
    #[inline]
    #[must_use]
    pub fn target(&self) -> &TargetImage {
        &self.target
    }

    /// Tile layout
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }
}
