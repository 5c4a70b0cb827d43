//! Mural Core - dispatch scheduler for a fleet of canvas agents
//!
//! Coordinates many independent agents redrawing a target image on a
//! shared tiled canvas:
//! - Keeps the observed canvas current from per-tile feeds
//! - Partitions the outstanding diff fairly across live agents
//! - Enforces each agent's cooldown before issuing a write
//! - Reconciles write outcomes into next-eligible times and liveness
//!
//! # Example
//!
//! ```rust,ignore
//! use mural_core::prelude::*;
//!
//! # async fn example(collab: Collaborators) -> Result<(), FleetError> {
//! let config = FleetConfig::from_file(Path::new("mural.toml"))?;
//! let fleet = Fleet::bootstrap(config, collab).await?;
//!
//! let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let stats = fleet.run(stop_rx).await?;
//! println!("Placed {} pixels", stats.successes);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod agent;
pub mod config;
pub mod error;
pub mod feed;
pub mod fleet;
pub mod outcome;
pub mod queue;
pub mod remote;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod sim;

pub use agent::{AgentSession, Liveness};
pub use config::FleetConfig;
pub use error::{ConfigError, FleetError, QueueError, SessionError, TransportError};
pub use feed::{follow_tile, spawn_feeds};
pub use fleet::{Collaborators, Fleet};
pub use outcome::{
    CooldownChange, Disposition, OutcomeInterpreter, WriteOutcome, BANNED_SENTINEL_SECS,
};
pub use queue::{PendingQueue, WriteIntention};
pub use remote::{
    CanvasConfiguration, CanvasFeed, DiffEvent, DiffStream, ImageSource, PaletteColor,
    PixelWriter, StaticImage, WriteRequest, WriteResponse,
};
pub use roster::{AgentIdentity, JsonRosterStore, MemoryRoster, RosterStore, StoredCookie};
pub use scheduler::{partition, DispatchStats, Dispatcher, TickReport, WriteReport};
pub use session::{ExclusiveSessions, NoopSessions, SessionProvider, SharedResource};
pub use sim::{GradientImage, SimStats, SimulatedCanvas, SimulatorConfig};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Mural Core
    pub use crate::{
        AgentIdentity, AgentSession, CanvasFeed, Collaborators, Dispatcher, Fleet, FleetConfig,
        FleetError, ImageSource, OutcomeInterpreter, PixelWriter, RosterStore, SessionProvider,
        TickReport, WriteOutcome,
    };
    pub use mural_canvas::{CanvasModel, Color, Palette, Point, TileLayout};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
