//! FinishMatchUseCase: persist both results once, then release navigation.
//!
//! When a match completes the operator picks where to go next (photobooth
//! or home).  Before the kiosk leaves the result screen both players'
//! [`MatchRecord`]s must be durably accepted by the [`ResultStore`].
//!
//! # Save semantics
//!
//! - Both records are written concurrently.
//! - A record the store already accepted is never written again, so a retry
//!   after a partial failure does not duplicate rows.
//! - Once both records are saved, later navigation requests do not touch the
//!   store.
//! - A failed write leaves the match "not yet saved"; the UI may retry or
//!   skip saving explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{MatchOutcome, MatchRecord, MatchState, PersistenceErrorKind, PlayerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

/// Errors raised by a [`ResultStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write record: {0}")]
    WriteFailed(String),

    #[error("failed to read records: {0}")]
    ReadFailed(String),
}

/// Append-only storage for leaderboard records.
///
/// Implementations must be safe to call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Appends one record.  `Ok` means the record is durably accepted.
    async fn append_record(&self, record: MatchRecord) -> Result<(), StoreError>;

    /// The `n` highest-scoring records, best first.
    async fn top_n(&self, n: usize) -> Result<Vec<MatchRecord>, StoreError>;

    /// A live view of [`top_n`](Self::top_n), refreshed after every append.
    async fn subscribe_top_n(
        &self,
        n: usize,
    ) -> Result<watch::Receiver<Vec<MatchRecord>>, StoreError>;
}

/// Screens the kiosk can navigate to after a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTarget {
    Photobooth,
    Home,
}

/// Whether the current match's results have been saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    NotSaved,
    /// One record was accepted and the other failed.
    Partial,
    Saved,
}

/// A save attempt that did not complete.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PersistenceError {
    pub kind: PersistenceErrorKind,
    pub message: String,
}

/// Writes the results of one match at most once.
pub struct MatchFinisher {
    store: Arc<dyn ResultStore>,
    written: [bool; 2],
    /// Records are built once so a retry writes identical rows.
    records: Option<[MatchRecord; 2]>,
}

impl MatchFinisher {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            written: [false; 2],
            records: None,
        }
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        Arc::clone(&self.store)
    }

    pub fn status(&self) -> SaveStatus {
        match self.written {
            [true, true] => SaveStatus::Saved,
            [false, false] => SaveStatus::NotSaved,
            _ => SaveStatus::Partial,
        }
    }

    /// Forgets the previous match.  Call when a new match begins.
    pub fn reset(&mut self) {
        self.written = [false; 2];
        self.records = None;
    }

    /// Saves both players' records if they are not saved yet.
    pub async fn save(
        &mut self,
        state: &MatchState,
        outcome: &MatchOutcome,
    ) -> Result<(), PersistenceError> {
        self.save_at(state, outcome, Utc::now()).await
    }

    /// [`save`](Self::save) with an explicit record timestamp.
    pub async fn save_at(
        &mut self,
        state: &MatchState,
        outcome: &MatchOutcome,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        if self.status() == SaveStatus::Saved {
            return Ok(());
        }
        let [first, second] = self
            .records
            .get_or_insert_with(|| MatchRecord::for_match(state, outcome, timestamp))
            .clone();

        let store = &self.store;
        let written = self.written;
        let write = |already: bool, record: MatchRecord| async move {
            if already {
                Ok(())
            } else {
                store.append_record(record).await
            }
        };
        let (r1, r2) = tokio::join!(write(written[0], first), write(written[1], second));

        let mut failures = Vec::new();
        for (id, result) in PlayerId::ALL.into_iter().zip([r1, r2]) {
            match result {
                Ok(()) => self.written[id.index()] = true,
                Err(e) => {
                    error!("saving {id} record failed: {e}");
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            info!("match {} results saved", state.match_id);
            Ok(())
        } else {
            Err(PersistenceError {
                kind: PersistenceErrorKind::WriteFailed,
                message: failures.join("; "),
            })
        }
    }
}
