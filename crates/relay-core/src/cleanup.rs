//! Transient artifact cleanup: downloaded files and live status messages.

use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::RelayTuning,
    domain::MessageRef,
    errors::Error,
    messaging::port::MessagingPort,
    utils::{read_json_or_default, write_json_atomic},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct CleanupPolicy {
    /// Pause before the first attempt of a release, once per item.
    pub settle: Duration,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

impl From<&RelayTuning> for CleanupPolicy {
    fn from(t: &RelayTuning) -> Self {
        Self {
            settle: t.cleanup_settle,
            attempts: t.cleanup_attempts.max(1),
            backoff: t.cleanup_backoff,
        }
    }
}

/// Delete `path`, retrying while the filesystem refuses.
///
/// A file that is already gone counts as deleted. `settle` is not applied here.
pub async fn remove_with_retry(path: &Path, policy: CleanupPolicy) -> Result<()> {
    let mut last_err = None;
    for attempt in 1..=policy.attempts.max(1) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                tracing::debug!(path = %path.display(), attempt, error = %e, "delete attempt failed");
                last_err = Some(e);
            }
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    Err(Error::CleanupFailed {
        path: path.to_path_buf(),
        reason: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Paths created while processing one item.
///
/// Call [`TransientFiles::release`] on every exit path; anything still tracked
/// when the guard drops is removed synchronously as a last resort.
pub struct TransientFiles {
    paths: Vec<PathBuf>,
    policy: CleanupPolicy,
}

impl TransientFiles {
    pub fn new(policy: CleanupPolicy) -> Self {
        Self {
            paths: Vec::new(),
            policy,
        }
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Swap a tracked path for its new name after a rename.
    pub fn retrack(&mut self, old: &Path, new: impl Into<PathBuf>) {
        self.paths.retain(|p| p != old);
        self.track(new);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Delete everything tracked. Failures are logged, never returned.
    pub async fn release(mut self) {
        let paths = std::mem::take(&mut self.paths);
        if paths.is_empty() {
            return;
        }
        if !self.policy.settle.is_zero() {
            tokio::time::sleep(self.policy.settle).await;
        }
        for path in paths {
            if let Err(e) = remove_with_retry(&path, self.policy).await {
                tracing::warn!(error = %e, "abandoning transient file");
            }
        }
    }
}

impl Drop for TransientFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "transient file left behind"),
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    live: BTreeSet<(i64, i32)>,
}

/// Persistent list of status messages that are still on screen.
///
/// A crash between "status sent" and "status deleted" leaves an entry here;
/// the next startup sweep deletes those messages.
pub struct StatusLedger {
    path: Option<PathBuf>,
    state: Mutex<LedgerFile>,
}

impl StatusLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = read_json_or_default::<LedgerFile>(&path)?;
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Ledger without a backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerFile::default()),
        }
    }

    pub fn record(&self, msg: MessageRef) {
        self.update(|s| {
            s.live.insert((msg.chat_id.0, msg.message_id.0));
        });
    }

    pub fn forget(&self, msg: MessageRef) {
        self.update(|s| {
            s.live.remove(&(msg.chat_id.0, msg.message_id.0));
        });
    }

    pub fn live(&self) -> Vec<MessageRef> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .live
            .iter()
            .map(|&(chat, msg)| MessageRef {
                chat_id: crate::domain::ChatId(chat),
                message_id: crate::domain::MessageId(msg),
            })
            .collect()
    }

    fn update(&self, f: impl FnOnce(&mut LedgerFile)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state);
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &*state) {
                tracing::warn!(path = %path.display(), error = %e, "status ledger write failed");
            }
        }
    }
}

/// What the startup sweep removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub statuses_removed: usize,
}

/// Remove artifacts left by a previous run: transient downloads and stale status messages.
pub async fn sweep_startup(
    download_dir: &Path,
    ledger: &StatusLedger,
    messenger: Arc<dyn MessagingPort>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    tokio::fs::create_dir_all(download_dir).await?;
    let mut entries = tokio::fs::read_dir(download_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => report.files_removed += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "stale download not removed")
            }
        }
    }

    for msg in ledger.live() {
        if let Err(e) = messenger.delete_message(msg).await {
            tracing::debug!(chat = msg.chat_id.0, message = msg.message_id.0, error = %e, "stale status not deleted");
        } else {
            report.statuses_removed += 1;
        }
        ledger.forget(msg);
    }

    if report != SweepReport::default() {
        tracing::info!(
            files = report.files_removed,
            statuses = report.statuses_removed,
            "startup sweep removed leftovers"
        );
    }
    Ok(report)
}
