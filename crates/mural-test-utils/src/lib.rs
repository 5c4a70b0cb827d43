//! Testing utilities for mural workspace
//!
//! Shared fixtures, a scripted pixel writer and a recording session
//! provider.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mural_canvas::{
    CanvasModel, Color, Palette, PaletteEntry, Point, SourceImage, TargetImage, Tile, TileLayout,
    TilePatch,
};
use mural_core::{
    AgentIdentity, Dispatcher, FleetConfig, OutcomeInterpreter, PixelWriter, SessionError,
    SessionProvider, TransportError, WriteRequest, WriteResponse, BANNED_SENTINEL_SECS,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BLACK: Color = Color::new(0, 0, 0);
pub const WHITE: Color = Color::new(255, 255, 255);
pub const RED: Color = Color::new(255, 0, 0);
pub const BLUE: Color = Color::new(0, 0, 255);

pub const BASE_COOLDOWN_MS: u64 = 300_000;
pub const JITTER_MAX_MS: u64 = 60_000;

/// {0: black, 1: white, 2: red, 3: blue}
pub fn test_palette() -> Palette {
    Palette::new([
        PaletteEntry { index: 0, color: BLACK },
        PaletteEntry { index: 1, color: WHITE },
        PaletteEntry { index: 2, color: RED },
        PaletteEntry { index: 3, color: BLUE },
    ])
    .unwrap()
}

/// Two 10x10 tiles side by side, no origin shift
pub fn small_layout() -> TileLayout {
    TileLayout::new(
        vec![Tile::new(0, 0, 0, 10, 10), Tile::new(1, 10, 0, 10, 10)],
        Point::new(0, 0),
    )
    .unwrap()
}

/// Configuration over `small_layout` with reference cooldowns
pub fn test_config() -> FleetConfig {
    let layout = small_layout();
    FleetConfig::new()
        .with_tiles(layout.tiles().to_vec(), layout.canvas_origin())
        .with_tick_interval(Duration::from_millis(10))
        .with_base_cooldown(Duration::from_millis(BASE_COOLDOWN_MS))
        .with_jitter_max(Duration::from_millis(JITTER_MAX_MS))
        .with_write_timeout(Duration::from_millis(200))
        .with_target_origin(Point::new(0, 0))
}

/// One-row target image at `origin`
pub fn row_target(colors: &[Color], origin: Point, palette: &Palette) -> TargetImage {
    let width = u32::try_from(colors.len()).unwrap();
    let source = SourceImage::new(width, 1, colors.to_vec()).unwrap();
    TargetImage::load(&source, origin, palette).unwrap()
}

/// Canvas over `small_layout` whose target is one row at the origin
pub fn row_canvas(colors: &[Color]) -> Arc<CanvasModel> {
    Arc::new(CanvasModel::new(
        row_target(colors, Point::new(0, 0), &test_palette()),
        small_layout(),
    ))
}

/// Deliver an empty full frame for every tile the target touches
pub fn mark_ready(canvas: &CanvasModel) {
    for &tile in canvas.required_tiles() {
        canvas.apply_diff_event(tile, &TilePatch::full(Vec::new())).unwrap();
    }
}

/// Report `color` as observed at a global point
pub fn observe(canvas: &CanvasModel, point: Point, color: Color) {
    let (tile, local) = canvas.map_to_tile(point).unwrap();
    canvas
        .apply_diff_event(tile, &TilePatch::diff(vec![(local, color)]))
        .unwrap();
}

/// Dispatcher over `canvas` with seeded jitter and the given agents
pub fn dispatcher(
    canvas: Arc<CanvasModel>,
    writer: Arc<dyn PixelWriter>,
    config: &FleetConfig,
    agents: &[&str],
) -> Dispatcher {
    let interpreter = OutcomeInterpreter::seeded(config.base_cooldown_ms, config.jitter_max_ms, 7);
    let dispatcher = Dispatcher::new(canvas, Arc::new(test_palette()), writer, interpreter, config);
    for name in agents {
        dispatcher.add_agent(AgentIdentity::new(*name));
    }
    dispatcher
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(WriteResponse),
    Fail(TransportError),
    /// Never answer; exercises the write timeout
    Hang,
}

impl Reply {
    pub fn placed() -> Self {
        Self::Respond(WriteResponse::Placed { timestamp_ms: None })
    }

    pub fn rate_limited(next_available_ms: i64) -> Self {
        Self::Respond(WriteResponse::Rejected {
            message: "Ratelimited".to_string(),
            next_available_ms: Some(next_available_ms),
        })
    }

    pub fn banned() -> Self {
        Self::rate_limited(BANNED_SENTINEL_SECS * 1000)
    }

    pub fn unverified() -> Self {
        Self::Respond(WriteResponse::Rejected {
            message: "unable to verify user".to_string(),
            next_available_ms: None,
        })
    }
}

/// Pixel writer answering from a per-agent script, `Placed` once exhausted
#[derive(Debug, Default)]
pub struct ScriptedWriter {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<WriteRequest>>,
    authors: Mutex<HashMap<(u32, Point), String>>,
    history_hangs: AtomicBool,
}

impl ScriptedWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for `agent`
    pub fn script(&self, agent: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .entry(agent.to_string())
            .or_default()
            .extend(replies);
    }

    /// Report `author` as the last writer of a tile-local pixel
    pub fn set_author(&self, tile_id: u32, local: Point, author: &str) {
        self.authors.lock().insert((tile_id, local), author.to_string());
    }

    /// Never answer placement-history queries
    pub fn hang_history(&self) {
        self.history_hangs.store(true, Ordering::SeqCst);
    }

    /// Every request received, in order
    pub fn calls(&self) -> Vec<WriteRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, agent: &str) -> Vec<WriteRequest> {
        self.calls().into_iter().filter(|r| r.agent == agent).collect()
    }
}

#[async_trait]
impl PixelWriter for ScriptedWriter {
    async fn submit_write(&self, request: &WriteRequest) -> Result<WriteResponse, TransportError> {
        self.calls.lock().push(request.clone());
        let reply = self
            .scripts
            .lock()
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(Reply::placed);
        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Closed)
            }
        }
    }

    async fn placement_author(
        &self,
        tile_id: u32,
        local: Point,
    ) -> Result<Option<String>, TransportError> {
        if self.history_hangs.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.authors.lock().get(&(tile_id, local)).cloned())
    }
}

/// Session provider that records calls and fails configured identities
#[derive(Debug, Default)]
pub struct RecordingSessions {
    failing: HashSet<String>,
    established: Mutex<Vec<String>>,
    reestablished: Mutex<Vec<String>>,
    reestablish_hangs: bool,
}

impl RecordingSessions {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| (*n).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Re-establishment never completes
    pub fn hanging() -> Self {
        Self {
            reestablish_hangs: true,
            ..Self::default()
        }
    }

    pub fn established(&self) -> Vec<String> {
        self.established.lock().clone()
    }

    pub fn reestablished(&self) -> Vec<String> {
        self.reestablished.lock().clone()
    }
}

#[async_trait]
impl SessionProvider for RecordingSessions {
    async fn establish(&self, identity: &mut AgentIdentity) -> Result<(), SessionError> {
        if self.failing.contains(&identity.username) {
            return Err(SessionError::LoginFailed {
                username: identity.username.clone(),
                reason: "rejected".to_string(),
            });
        }
        identity.access_token = Some(format!("token-{}", identity.username));
        self.established.lock().push(identity.username.clone());
        Ok(())
    }

    async fn reestablish(&self, identity: &AgentIdentity) -> Result<(), SessionError> {
        self.reestablished.lock().push(identity.username.clone());
        if self.reestablish_hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

/// `ms` since epoch as a UTC instant
pub fn instant_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}
