//! Inbound tile feeds
//!
//! One long-lived task per tile keeps the observed canvas current. Patches
//! of a tile are applied in arrival order by that tile's task alone; tiles
//! progress independently. A dropped subscription is re-opened after a
//! delay until shutdown.

use crate::remote::CanvasFeed;
use futures::StreamExt;
use mural_canvas::CanvasModel;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Start one feed task per tile the target touches
pub fn spawn_feeds(
    feed: Arc<dyn CanvasFeed>,
    canvas: Arc<CanvasModel>,
    retry: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    for &tile_id in canvas.required_tiles() {
        tasks.spawn(follow_tile(
            Arc::clone(&feed),
            Arc::clone(&canvas),
            tile_id,
            retry,
            shutdown.clone(),
        ));
    }
    tracing::info!("Following {} tiles", tasks.len());
    tasks
}

/// Apply the patches of one tile until shutdown
pub async fn follow_tile(
    feed: Arc<dyn CanvasFeed>,
    canvas: Arc<CanvasModel>,
    tile_id: u32,
    retry: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match feed.subscribe(tile_id).await {
            Ok(mut stream) => loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            if event.tile_id != tile_id {
                                tracing::warn!(tile = tile_id, "Patch for tile {} on this feed", event.tile_id);
                            }
                            match canvas.apply_diff_event(event.tile_id, &event.patch) {
                                Ok(written) => tracing::trace!(tile = event.tile_id, written, "Applied {:?} frame", event.patch.kind),
                                Err(e) => tracing::warn!(tile = event.tile_id, "Patch rejected: {}", e),
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(tile = tile_id, "Feed error: {}", e);
                            break;
                        }
                        None => {
                            tracing::info!(tile = tile_id, "Feed closed");
                            break;
                        }
                    },
                    _ = shutdown.changed() => return,
                }
            },
            Err(e) => tracing::warn!(tile = tile_id, "Subscribe failed: {}", e),
        }

        tokio::select! {
            () = tokio::time::sleep(retry) => {}
            _ = shutdown.changed() => return,
        }
    }
}
