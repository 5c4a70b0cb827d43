//! In-process simulated canvas service
//!
//! Deterministic for a given seed: serves tile feeds, enforces a per-account
//! cooldown, bans or refuses configured accounts and injects transport
//! failures at a configured rate. Used by `mural simulate` and by tests.

use crate::error::{ConfigError, SessionError, TransportError};
use crate::outcome::{add_ms, BANNED_SENTINEL_SECS, RATE_LIMITED_MESSAGE, UNVERIFIED_MESSAGE};
use crate::remote::{
    CanvasConfiguration, CanvasFeed, DiffEvent, DiffStream, ImageSource, PaletteColor, PixelWriter,
    WriteRequest, WriteResponse,
};
use crate::roster::AgentIdentity;
use crate::session::SessionProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mural_canvas::{CanvasError, Color, Palette, Point, SourceImage, TileLayout, TilePatch};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::broadcast;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Server-side cooldown between writes of one account
    pub cooldown_ms: u64,
    /// Probability that a write fails in transport
    pub transport_failure_rate: f64,
    /// Delay before each write is answered
    pub latency: Duration,
    /// Accounts the service reports as banned
    pub banned: HashSet<String>,
    /// Accounts the service refuses as unverified
    pub unverified: HashSet<String>,
    /// Accounts whose session setup fails
    pub failed_logins: HashSet<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            cooldown_ms: 0,
            transport_failure_rate: 0.0,
            latency: Duration::ZERO,
            banned: HashSet::new(),
            unverified: HashSet::new(),
            failed_logins: HashSet::new(),
        }
    }
}

/// Service-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Pixels placed
    pub placed: u64,
    /// Writes refused
    pub rejected: u64,
    /// Writes failed in transport
    pub transport_failures: u64,
    /// Sessions established
    pub logins: u64,
}

#[derive(Debug)]
struct SimState {
    pixels: HashMap<(u32, Point), u8>,
    authors: HashMap<(u32, Point), String>,
    next_allowed: HashMap<String, DateTime<Utc>>,
    rng: StdRng,
    stats: SimStats,
}

/// Simulated canvas service
#[derive(Debug)]
pub struct SimulatedCanvas {
    layout: TileLayout,
    palette: Palette,
    config: SimulatorConfig,
    state: Mutex<SimState>,
    events: broadcast::Sender<DiffEvent>,
}

impl SimulatedCanvas {
    /// Blank canvas over `layout`, announcing `palette`
    #[must_use]
    pub fn new(layout: TileLayout, palette: Palette, config: SimulatorConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            layout,
            palette,
            state: Mutex::new(SimState {
                pixels: HashMap::new(),
                authors: HashMap::new(),
                next_allowed: HashMap::new(),
                rng: StdRng::seed_from_u64(config.seed),
                stats: SimStats::default(),
            }),
            config,
            events,
        }
    }

    /// Paint a pixel directly, as another user of the canvas would
    ///
    /// # Errors
    /// Out-of-bounds points or colours outside the palette
    pub fn paint(&self, global: Point, color: Color) -> Result<(), ConfigError> {
        let (tile_id, local) = self.layout.map_to_tile(global)?;
        let index = self
            .palette
            .index_of(color)
            .ok_or_else(|| ConfigError::Invalid(format!("colour {color} is not in the palette")))?;
        let mut state = self.state.lock();
        state.pixels.insert((tile_id, local), index);
        let _ = self.events.send(DiffEvent {
            tile_id,
            patch: TilePatch::diff(vec![(local, color)]),
        });
        Ok(())
    }

    /// Colour at a global point, if painted
    #[must_use]
    pub fn color_at(&self, global: Point) -> Option<Color> {
        let key = self.layout.map_to_tile(global).ok()?;
        let index = *self.state.lock().pixels.get(&key)?;
        self.palette.get(index).map(|e| e.color)
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats.clone()
    }

    fn full_frame(&self, tile_id: u32) -> TilePatch {
        let state = self.state.lock();
        let pixels = state
            .pixels
            .iter()
            .filter(|((tile, _), _)| *tile == tile_id)
            .filter_map(|((_, local), index)| self.palette.get(*index).map(|e| (*local, e.color)))
            .collect();
        TilePatch::full(pixels)
    }

    fn rejected(state: &mut SimState, message: &str, next_available_ms: Option<i64>) -> WriteResponse {
        state.stats.rejected += 1;
        WriteResponse::Rejected {
            message: message.to_string(),
            next_available_ms,
        }
    }
}

#[async_trait]
impl CanvasFeed for SimulatedCanvas {
    async fn handshake(&self) -> Result<CanvasConfiguration, TransportError> {
        let tiles = self.layout.tiles().to_vec();
        let width = tiles
            .iter()
            .map(|t| i64::from(t.offset_x) + i64::from(t.width))
            .max()
            .unwrap_or(0);
        let height = tiles
            .iter()
            .map(|t| i64::from(t.offset_y) + i64::from(t.height))
            .max()
            .unwrap_or(0);
        Ok(CanvasConfiguration {
            palette: self
                .palette
                .iter()
                .map(|e| PaletteColor {
                    index: e.index,
                    hex: Some(e.color.to_hex()),
                })
                .collect(),
            tiles,
            canvas_width: u32::try_from(width).unwrap_or(u32::MAX),
            canvas_height: u32::try_from(height).unwrap_or(u32::MAX),
        })
    }

    async fn subscribe(&self, tile_id: u32) -> Result<DiffStream, TransportError> {
        if self.layout.tile(tile_id).is_none() {
            return Err(TransportError::Send(format!("no such tile {tile_id}")));
        }
        let rx = self.events.subscribe();
        let initial = DiffEvent {
            tile_id,
            patch: self.full_frame(tile_id),
        };

        let updates = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.tile_id == tile_id => return Some((Ok(event), rx)),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        return Some((Err(TransportError::Send(format!("feed lagged by {missed} events"))), rx));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(futures::stream::iter([Ok(initial)]).chain(updates).boxed())
    }
}

#[async_trait]
impl PixelWriter for SimulatedCanvas {
    async fn submit_write(&self, request: &WriteRequest) -> Result<WriteResponse, TransportError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        let now = Utc::now();
        let mut state = self.state.lock();

        if self.config.transport_failure_rate > 0.0
            && state.rng.gen_bool(self.config.transport_failure_rate.min(1.0))
        {
            state.stats.transport_failures += 1;
            return Err(TransportError::Send("simulated connection reset".to_string()));
        }
        if self.config.banned.contains(&request.agent) {
            return Ok(Self::rejected(
                &mut state,
                RATE_LIMITED_MESSAGE,
                Some(BANNED_SENTINEL_SECS * 1000),
            ));
        }
        if self.config.unverified.contains(&request.agent) {
            return Ok(Self::rejected(&mut state, UNVERIFIED_MESSAGE, None));
        }
        if let Some(&next) = state.next_allowed.get(&request.agent) {
            if next > now {
                return Ok(Self::rejected(
                    &mut state,
                    RATE_LIMITED_MESSAGE,
                    Some(next.timestamp_millis()),
                ));
            }
        }
        let Some(color) = self.palette.get(request.color_index).map(|e| e.color) else {
            return Ok(Self::rejected(&mut state, "invalid colour index", None));
        };
        if self.layout.to_global(request.tile_id, request.local).is_err() {
            return Ok(Self::rejected(&mut state, "invalid coordinate", None));
        }

        let key = (request.tile_id, request.local);
        state.pixels.insert(key, request.color_index);
        state.authors.insert(key, request.agent.clone());
        state
            .next_allowed
            .insert(request.agent.clone(), add_ms(now, self.config.cooldown_ms));
        state.stats.placed += 1;
        let _ = self.events.send(DiffEvent {
            tile_id: request.tile_id,
            patch: TilePatch::diff(vec![(request.local, color)]),
        });

        Ok(WriteResponse::Placed {
            timestamp_ms: Some(now.timestamp_millis()),
        })
    }

    async fn placement_author(
        &self,
        tile_id: u32,
        local: Point,
    ) -> Result<Option<String>, TransportError> {
        Ok(self.state.lock().authors.get(&(tile_id, local)).cloned())
    }
}

#[async_trait]
impl SessionProvider for SimulatedCanvas {
    async fn establish(&self, identity: &mut AgentIdentity) -> Result<(), SessionError> {
        if self.config.failed_logins.contains(&identity.username) {
            return Err(SessionError::LoginFailed {
                username: identity.username.clone(),
                reason: "invalid credentials".to_string(),
            });
        }
        if identity.access_token.is_none() {
            identity.access_token = Some(format!("sim-{}", identity.username));
        }
        self.state.lock().stats.logins += 1;
        Ok(())
    }
}

/// Deterministic diagonal gradient
#[derive(Debug, Clone, Copy)]
pub struct GradientImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl GradientImage {
    /// Render the gradient
    ///
    /// # Errors
    /// `CanvasError::ImageDimensions` for a zero-sized image
    pub fn render(&self) -> Result<SourceImage, CanvasError> {
        let span = (self.width + self.height).max(2) - 1;
        let pixels = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .map(|(x, y)| {
                let t = (x + y) * 255 / span;
                let t = u8::try_from(t).unwrap_or(u8::MAX);
                Color::new(t, 255 - t, 128)
            })
            .collect();
        SourceImage::new(self.width, self.height, pixels)
    }
}

#[async_trait]
impl ImageSource for GradientImage {
    async fn load_source_image(&self) -> Result<SourceImage, ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::SourceImage(format!(
                "empty {}x{} image",
                self.width, self.height
            )));
        }
        self.render().map_err(|e| ConfigError::SourceImage(e.to_string()))
    }
}
