//! Remote collaborator contracts
//!
//! The dispatcher only needs an abstract read side ("stream the patches of
//! one tile") and write side ("paint one pixel, get a response"). Concrete
//! transports implement these traits; `sim` provides an in-process one.

use crate::error::{ConfigError, TransportError};
use crate::roster::AgentIdentity;
use async_trait::async_trait;
use futures::stream::BoxStream;
use mural_canvas::{
    CanvasError, Color, Palette, PaletteEntry, Point, SourceImage, Tile, TilePatch,
};
use serde::{Deserialize, Serialize};

/// One inbound patch for one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEvent {
    /// Tile the patch belongs to
    pub tile_id: u32,
    /// Observed colours, tile-local
    pub patch: TilePatch,
}

/// Long-lived inbound stream of one tile
pub type DiffStream = BoxStream<'static, Result<DiffEvent, TransportError>>;

/// Palette entry as announced by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteColor {
    /// Colour index
    pub index: u8,
    /// `#RRGGBB`; absent means the reference colour for `index`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

/// Configuration handshake, performed once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasConfiguration {
    /// Active colours
    pub palette: Vec<PaletteColor>,
    /// Tiles the service serves
    pub tiles: Vec<Tile>,
    /// Full canvas width
    pub canvas_width: u32,
    /// Full canvas height
    pub canvas_height: u32,
}

impl CanvasConfiguration {
    /// Resolve the announced colours into a palette
    ///
    /// Entries with explicit hex codes use them; the rest fall back to the
    /// reference colour of the same index.
    ///
    /// # Errors
    /// `CanvasError::EmptyPalette` when nothing resolves,
    /// `CanvasError::InvalidHex` for a malformed hex code
    pub fn palette(&self) -> Result<Palette, CanvasError> {
        let reference = Palette::reference();
        let mut entries = Vec::with_capacity(self.palette.len());
        for announced in &self.palette {
            let color = match &announced.hex {
                Some(hex) => Color::from_hex(hex)?,
                None => match reference.get(announced.index) {
                    Some(entry) => entry.color,
                    None => {
                        tracing::warn!(index = announced.index, "unknown palette index ignored");
                        continue;
                    }
                },
            };
            entries.push(PaletteEntry {
                index: announced.index,
                color,
            });
        }
        let palette = Palette::new(entries)?;
        if palette.is_empty() {
            return Err(CanvasError::EmptyPalette);
        }
        Ok(palette)
    }
}

/// Inbound side of the remote service
#[async_trait]
pub trait CanvasFeed: Send + Sync {
    /// Fetch the canvas configuration
    async fn handshake(&self) -> Result<CanvasConfiguration, TransportError>;

    /// Subscribe to the patches of one tile
    ///
    /// Patches for the tile arrive in order. The stream ends or errors when
    /// the subscription drops.
    async fn subscribe(&self, tile_id: u32) -> Result<DiffStream, TransportError>;
}

/// One outbound pixel write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Username of the writing agent
    pub agent: String,
    /// Target tile
    pub tile_id: u32,
    /// Tile-local coordinate
    pub local: Point,
    /// Palette index to paint
    pub color_index: u8,
}

impl WriteRequest {
    /// Request for `identity`
    #[must_use]
    pub fn new(identity: &AgentIdentity, tile_id: u32, local: Point, color_index: u8) -> Self {
        Self {
            agent: identity.username.clone(),
            tile_id,
            local,
            color_index,
        }
    }
}

/// Raw response of the remote service to one write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteResponse {
    /// Pixel accepted
    Placed {
        /// Server time of the placement, ms since epoch
        #[serde(default)]
        timestamp_ms: Option<i64>,
    },
    /// Pixel refused
    Rejected {
        /// Server message
        message: String,
        /// Next instant the account may write, ms since epoch
        #[serde(default)]
        next_available_ms: Option<i64>,
    },
}

/// Outbound side of the remote service
#[async_trait]
pub trait PixelWriter: Send + Sync {
    /// Paint one pixel as `request.agent`
    async fn submit_write(&self, request: &WriteRequest) -> Result<WriteResponse, TransportError>;

    /// Who last painted the pixel, if the service exposes history
    async fn placement_author(
        &self,
        _tile_id: u32,
        _local: Point,
    ) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

/// Source bitmap provider
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Load the raw pixel grid once
    async fn load_source_image(&self) -> Result<SourceImage, ConfigError>;
}

/// Image source over an already decoded bitmap
#[derive(Debug, Clone)]
pub struct StaticImage(pub SourceImage);

#[async_trait]
impl ImageSource for StaticImage {
    async fn load_source_image(&self) -> Result<SourceImage, ConfigError> {
        Ok(self.0.clone())
    }
}
