// Shared daemon state handed to every HTTP and socket handler

use crate::daemon::assets::{
    AnnotationRoutes, AssetManager, Clock, SystemClock, ASSET_TTL_MINUTES, ROUTE_RETENTION_HOURS,
};
use crate::daemon::registry::SessionRegistry;
use crate::daemon::sidecar::SidecarStore;
use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// How often expired assets and routes are swept (5 minutes)
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Component instances owned by the daemon
#[derive(Clone)]
pub struct AppState {
    pub assets: Arc<AssetManager>,
    pub routes: Arc<AnnotationRoutes>,
    pub sessions: Arc<SessionRegistry>,
    pub sidecars: Arc<SidecarStore>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// State whose expiry decisions follow `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            assets: Arc::new(AssetManager::with_clock(
                Arc::clone(&clock),
                Duration::minutes(ASSET_TTL_MINUTES),
            )),
            routes: Arc::new(AnnotationRoutes::with_clock(
                clock,
                Duration::hours(ROUTE_RETENTION_HOURS),
            )),
            sessions: Arc::new(SessionRegistry::new()),
            sidecars: Arc::new(SidecarStore::new()),
        }
    }

    /// One eviction pass over assets and routes
    pub fn sweep(&self) -> (usize, usize) {
        let assets = self.assets.evict_expired();
        let routes = self.routes.evict_expired();
        if assets > 0 || routes > 0 {
            tracing::debug!(assets, routes, "evicted expired entries");
        }
        (assets, routes)
    }

    /// Run `sweep` every `interval` until the handle is aborted
    pub fn spawn_sweeper(&self, interval: std::time::Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                state.sweep();
            }
        })
    }
}
