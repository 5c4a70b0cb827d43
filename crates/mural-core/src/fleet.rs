//! Fleet bootstrap
//!
//! Startup order:
//! 1. Validate configuration and build the tile layout
//! 2. Handshake with the canvas service for the palette
//! 3. Load and quantize the source image into the target
//! 4. Load the roster and establish a session per identity
//! 5. Persist the roster so acquired credentials survive restarts
//!
//! Any configuration failure stops startup. Identities whose session setup
//! fails are left out of the fleet.

use crate::config::FleetConfig;
use crate::error::{ConfigError, FleetError};
use crate::feed::spawn_feeds;
use crate::outcome::OutcomeInterpreter;
use crate::remote::{CanvasFeed, ImageSource, PixelWriter};
use crate::roster::RosterStore;
use crate::scheduler::{DispatchStats, Dispatcher};
use crate::session::SessionProvider;
use mural_canvas::{CanvasModel, Palette, TargetImage};
use std::sync::Arc;
use tokio::sync::watch;

/// External collaborators a fleet is built from
#[derive(Clone)]
pub struct Collaborators {
    /// Inbound canvas feed
    pub feed: Arc<dyn CanvasFeed>,
    /// Outbound pixel writes
    pub writer: Arc<dyn PixelWriter>,
    /// Session setup
    pub sessions: Arc<dyn SessionProvider>,
    /// Roster persistence
    pub roster: Arc<dyn RosterStore>,
    /// Source bitmap
    pub image: Arc<dyn ImageSource>,
}

/// A bootstrapped fleet, ready to run
pub struct Fleet {
    config: FleetConfig,
    canvas: Arc<CanvasModel>,
    palette: Arc<Palette>,
    dispatcher: Arc<Dispatcher>,
    feed: Arc<dyn CanvasFeed>,
    excluded: Vec<String>,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("dispatcher", &self.dispatcher)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

impl Fleet {
    /// Build a fleet
    ///
    /// # Errors
    /// - `FleetError::Config` for invalid configuration, an empty palette,
    ///   an unloadable image or an empty roster
    /// - `FleetError::Transport` if the handshake fails
    /// - `FleetError::NoLiveAgents` if no session could be established
    pub async fn bootstrap(config: FleetConfig, collab: Collaborators) -> Result<Self, FleetError> {
        config.validate()?;
        let layout = config.tile_layout()?;

        let handshake = collab.feed.handshake().await?;
        let palette = handshake.palette().map_err(ConfigError::from)?;
        tracing::info!("Palette handshake: {} colours", palette.len());
        if !handshake.tiles.is_empty() && handshake.tiles != layout.tiles() {
            tracing::warn!(
                "Service announced {} tiles that differ from the configured layout; using configuration",
                handshake.tiles.len()
            );
        }

        let source = collab.image.load_source_image().await?;
        let target = TargetImage::load(&source, config.target_origin, &palette)
            .map_err(ConfigError::from)?;
        tracing::info!(
            "Target {}x{} at {} ({} pixels)",
            target.width(),
            target.height(),
            target.origin(),
            target.len()
        );
        let canvas = Arc::new(CanvasModel::new(target, layout));

        let mut identities = collab.roster.load().await?;
        if identities.is_empty() {
            return Err(ConfigError::EmptyRoster.into());
        }

        let mut established = Vec::new();
        let mut excluded = Vec::new();
        for identity in &mut identities {
            match collab.sessions.establish(identity).await {
                Ok(()) => established.push(identity.clone()),
                Err(e) => {
                    tracing::warn!("Excluding {}: {}", identity.username, e);
                    excluded.push(identity.username.clone());
                }
            }
        }
        if let Err(e) = collab.roster.save(&identities).await {
            tracing::warn!("Failed to persist roster: {}", e);
        }
        if established.is_empty() {
            return Err(FleetError::NoLiveAgents);
        }

        let palette = Arc::new(palette);
        let dispatcher = Dispatcher::new(
            Arc::clone(&canvas),
            Arc::clone(&palette),
            collab.writer,
            OutcomeInterpreter::from_config(&config),
            &config,
        )
        .with_sessions(collab.sessions);
        for identity in established {
            dispatcher.add_agent(identity);
        }
        tracing::info!(
            "Fleet ready: {} agents, {} excluded",
            dispatcher.agents().len(),
            excluded.len()
        );

        Ok(Self {
            config,
            canvas,
            palette,
            dispatcher: Arc::new(dispatcher),
            feed: collab.feed,
            excluded,
        })
    }

    /// Follow the canvas and dispatch writes until `shutdown` turns true
    ///
    /// Dispatch starts once every tile under the target has delivered a
    /// frame. Feed tasks stop on shutdown; in-flight writes are drained.
    ///
    /// # Errors
    /// `FleetError::NoLiveAgents` if every agent was retired
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<DispatchStats, FleetError> {
        let mut feeds = spawn_feeds(
            Arc::clone(&self.feed),
            Arc::clone(&self.canvas),
            self.config.feed_retry(),
            shutdown.clone(),
        );

        let ready = tokio::select! {
            () = self.canvas.wait_ready() => true,
            _ = shutdown.wait_for(|stop| *stop) => false,
        };
        let stats = if ready {
            tracing::info!("Canvas observed, {} points to paint", self.canvas.compute_diff().len());
            self.dispatcher.run(shutdown).await
        } else {
            self.dispatcher.stats()
        };

        feeds.shutdown().await;

        if self.dispatcher.live_agents().is_empty() {
            return Err(FleetError::NoLiveAgents);
        }
        Ok(stats)
    }

    /// Canvas model
    #[must_use]
    pub fn canvas(&self) -> &Arc<CanvasModel> {
        &self.canvas
    }

    /// Palette from the handshake
    #[must_use]
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Identities left out because session setup failed
    #[must_use]
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }
}
