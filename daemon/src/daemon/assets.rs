// Asset lifecycle: short-lived random ids for local files, served over /assets/{id}
//
// Two tables live here, each behind its own RwLock:
// - the asset table (id -> file, 30 minute TTL), read by GET /assets/{id}
// - the annotation routes (id -> source document), read when a device replies

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How long a registered asset stays retrievable
pub const ASSET_TTL_MINUTES: i64 = 30;

/// How long an asset id keeps routing annotation replies to its document
pub const ROUTE_RETENTION_HOURS: i64 = 24;

/// Random bytes per asset id (hex-encoded to twice as many characters)
const ASSET_ID_BYTES: usize = 16;

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// One registered file
#[derive(Debug, Clone, PartialEq)]
pub struct AssetEntry {
    pub id: String,
    pub absolute_path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

/// File contents as read at request time
#[derive(Debug, Clone)]
pub struct ServedAsset {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Registry of time-limited asset ids
pub struct AssetManager {
    entries: RwLock<HashMap<String, AssetEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for AssetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), Duration::minutes(ASSET_TTL_MINUTES))
    }

    pub fn with_clock(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Register a file and return its new id.
    ///
    /// The path is made absolute against the daemon's working directory and must
    /// name an existing regular file right now. Registering the same path twice
    /// yields two independent ids.
    pub async fn register(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::Validation("file_path is empty".to_string()));
        }

        let absolute_path = std::path::absolute(path)?;
        let metadata = tokio::fs::metadata(&absolute_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("{}: {}", absolute_path.display(), e))
                }
                _ => Error::Io(e),
            })?;
        if metadata.is_dir() {
            return Err(Error::Validation(format!(
                "{} is a directory",
                absolute_path.display()
            )));
        }

        let expires_at = self.clock.now() + self.ttl;

        let mut entries = self.entries.write();
        let id = loop {
            let candidate = generate_id();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        entries.insert(
            id.clone(),
            AssetEntry {
                id: id.clone(),
                absolute_path,
                expires_at,
            },
        );

        Ok(id)
    }

    /// Live entry for `id`, or None if unknown or past its expiry
    pub fn lookup(&self, id: &str) -> Option<AssetEntry> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(id)
            .filter(|entry| now <= entry.expires_at)
            .cloned()
    }

    /// Read the current bytes of a live asset
    pub async fn serve(&self, id: &str) -> Result<ServedAsset> {
        let entry = self
            .lookup(id)
            .ok_or_else(|| Error::NotFound(format!("asset {}", id)))?;

        let bytes = tokio::fs::read(&entry.absolute_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("{}: {}", entry.absolute_path.display(), e))
                }
                _ => Error::Io(e),
            })?;

        Ok(ServedAsset {
            bytes,
            content_type: content_type_for(&entry.absolute_path),
        })
    }

    /// Drop every entry past its expiry; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[derive(Debug, Clone)]
struct Route {
    source_path: PathBuf,
    expires_at: DateTime<Utc>,
}

/// Asset id -> source document, used to place annotation replies.
///
/// Kept well past the asset TTL since a document can stay open on the device
/// long after its bytes were fetched.
pub struct AnnotationRoutes {
    routes: RwLock<HashMap<String, Route>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for AnnotationRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationRoutes {
    pub fn new() -> Self {
        Self::with_clock(
            Arc::new(SystemClock),
            Duration::hours(ROUTE_RETENTION_HOURS),
        )
    }

    pub fn with_clock(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            retention,
            clock,
        }
    }

    pub fn record(&self, asset_id: &str, source_path: impl Into<PathBuf>) {
        let route = Route {
            source_path: source_path.into(),
            expires_at: self.clock.now() + self.retention,
        };
        self.routes.write().insert(asset_id.to_string(), route);
    }

    pub fn resolve(&self, asset_id: &str) -> Option<PathBuf> {
        let now = self.clock.now();
        self.routes
            .read()
            .get(asset_id)
            .filter(|route| now <= route.expires_at)
            .map(|route| route.source_path.clone())
    }

    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|_, route| now <= route.expires_at);
        before - routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; ASSET_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Content-Type header value for a served file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("md") | Some("markdown") => "text/markdown; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}
