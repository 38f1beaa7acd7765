//! Append-only leaderboard file.
//!
//! One [`MatchRecord`] per line, serialized as JSON:
//!
//! ```text
//! {"name":"Ana","score":105,"section":"","email":"","status":"WIN","matchLabel":"Ana & Ben","timestamp":"2026-03-14T09:12:44Z"}
//! {"name":"Ben","score":110,"section":"","email":"","status":"WIN","matchLabel":"Ana & Ben","timestamp":"2026-03-14T09:12:44Z"}
//! ```
//!
//! A record counts as accepted once its line is written and synced.  Lines
//! that fail to parse are skipped with a warning so one corrupt row never
//! hides the whole board.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use pulse_core::MatchRecord;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::application::finish_match::{ResultStore, StoreError};

struct Watcher {
    n: usize,
    tx: watch::Sender<Vec<MatchRecord>>,
}

/// [`ResultStore`] backed by a JSON-lines file.
pub struct JsonlResultStore {
    path: PathBuf,
    /// Serializes appends so concurrent writes never interleave lines.
    write_lock: tokio::sync::Mutex<()>,
    watchers: Mutex<Vec<Watcher>>,
}

impl JsonlResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_all(&self) -> Result<Vec<MatchRecord>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::ReadFailed(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("skipping leaderboard line {}: {e}", n + 1);
                    None
                }
            })
            .collect())
    }

    async fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await
    }

    async fn notify_watchers(&self) {
        let has_watchers = {
            let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers.retain(|w| !w.tx.is_closed());
            !watchers.is_empty()
        };
        if !has_watchers {
            return;
        }
        let records = match self.load_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("leaderboard refresh failed: {e}");
                return;
            }
        };
        let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        for watcher in watchers.iter() {
            watcher.tx.send_replace(rank(&records, watcher.n));
        }
    }
}

/// The `n` best records, highest score first; equal scores keep the earlier
/// record first.
fn rank(records: &[MatchRecord], n: usize) -> Vec<MatchRecord> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.timestamp.cmp(&b.timestamp)));
    ranked.truncate(n);
    ranked
}

#[async_trait]
impl ResultStore for JsonlResultStore {
    async fn append_record(&self, record: MatchRecord) -> Result<(), StoreError> {
        let mut line =
            serde_json::to_string(&record).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        line.push('\n');

        {
            let _guard = self.write_lock.lock().await;
            self.append_line(&line).await.map_err(|e| {
                StoreError::WriteFailed(format!("{}: {e}", self.path.display()))
            })?;
        }
        debug!("saved {} ({}) to leaderboard", record.name, record.score);

        self.notify_watchers().await;
        Ok(())
    }

    async fn top_n(&self, n: usize) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(rank(&self.load_all().await?, n))
    }

    async fn subscribe_top_n(
        &self,
        n: usize,
    ) -> Result<watch::Receiver<Vec<MatchRecord>>, StoreError> {
        let initial = self.top_n(n).await?;
        let (tx, rx) = watch::channel(initial);
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Watcher { n, tx });
        Ok(rx)
    }
}
