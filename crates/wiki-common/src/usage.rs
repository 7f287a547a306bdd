/// Process-wide request counters.
///
/// Counters live in memory behind an async mutex so concurrent requests never lose an
/// increment. Persistence is batched: a background task (see [`UsageTracker::spawn_flusher`])
/// writes the JSON snapshot to disk when something changed, and the owner flushes once more
/// on shutdown. The file format matches the historical `server_stats.json`.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CommonError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UsageStats {
    pub total_requests: u64,
    /// Request count per endpoint name
    #[serde(default)]
    pub endpoints: BTreeMap<String, u64>,
    /// Request count per caller-selected model
    #[serde(default)]
    pub models: BTreeMap<String, u64>,
    pub errors: u64,
    /// Unix time (seconds) of the last recorded change
    pub last_update: f64,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            total_requests: 0,
            endpoints: BTreeMap::new(),
            models: BTreeMap::new(),
            errors: 0,
            last_update: unix_now(),
        }
    }
}

/// `revision` counts changes; `persisted` is the revision last confirmed on disk.
#[derive(Debug, Default)]
struct State {
    stats: UsageStats,
    revision: u64,
    persisted: u64,
}

#[derive(Clone)]
pub struct UsageTracker {
    state: Arc<Mutex<State>>,
    path: Option<Arc<PathBuf>>,
}

impl UsageTracker {
    /// Load counters from `path`, starting from zero when the file is absent or unreadable.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<UsageStats>(&bytes)
                .inspect_err(|e| warn!(error = %e, path = %path.display(), "stats file unreadable, starting fresh"))
                .unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UsageStats::default(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to read stats file, starting fresh");
                UsageStats::default()
            }
        };
        info!(
            path = %path.display(),
            total_requests = stats.total_requests,
            "usage stats loaded"
        );
        Self {
            state: Arc::new(Mutex::new(State {
                stats,
                ..State::default()
            })),
            path: Some(Arc::new(path)),
        }
    }

    /// Counters that are never written to disk.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Count one request resolution. An errored request is recorded on top of its
    /// initial count, so it contributes twice to `total_requests`.
    pub async fn record(&self, endpoint: &str, model: &str, error: bool) {
        let mut state = self.state.lock().await;
        let stats = &mut state.stats;
        stats.total_requests += 1;
        *stats.endpoints.entry(endpoint.to_string()).or_insert(0) += 1;
        *stats.models.entry(model.to_string()).or_insert(0) += 1;
        if error {
            stats.errors += 1;
        }
        stats.last_update = unix_now();
        state.revision += 1;
    }

    pub async fn snapshot(&self) -> UsageStats {
        self.state.lock().await.stats.clone()
    }

    /// Persist the counters if they changed since the last successful flush. Returns
    /// whether a write happened. The file is replaced atomically via a sibling temp file.
    pub async fn flush(&self) -> Result<bool, CommonError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };

        let (revision, snapshot) = {
            let state = self.state.lock().await;
            if state.revision == state.persisted {
                return Ok(false);
            }
            (state.revision, state.stats.clone())
        };

        // Only a completed write advances `persisted`; a failed or cancelled write
        // leaves the changes pending for the next flush.
        write_atomic(path, &snapshot).await?;
        let mut state = self.state.lock().await;
        state.persisted = state.persisted.max(revision);
        Ok(true)
    }

    /// Flush every `every` until the runtime shuts down or the handle is aborted.
    pub fn spawn_flusher(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = tracker.flush().await {
                    warn!(error = %e, "failed to persist usage stats");
                }
            }
        })
    }
}

async fn write_atomic(path: &Path, stats: &UsageStats) -> Result<(), CommonError> {
    let json = serde_json::to_vec(stats)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs_f64()
}
