//! JSON-file backed implementation of the quota, settings and session stores.
//!
//! Settings editors live outside this workspace and share this file format.
//! Without a path the store lives in memory only.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::{
    customize::TransferSettings,
    domain::{SessionToken, UserId},
    ports::{QuotaStore, SessionStore, SettingsStore},
    utils::{read_json_or_default, write_json_atomic},
    Result,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserRecord {
    settings: TransferSettings,
    index_count: u64,
    session: Option<String>,
    /// Local calendar day (`YYYY-MM-DD`) the counter below belongs to.
    quota_day: Option<String>,
    quota_used: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    users: HashMap<i64, UserRecord>,
}

pub struct FileStore {
    path: Option<PathBuf>,
    /// Requests per requester per day; 0 disables the limit.
    daily_quota: u32,
    state: Mutex<StoreFile>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>, daily_quota: u32) -> Result<Self> {
        let path = path.into();
        let state = read_json_or_default::<StoreFile>(&path)?;
        tracing::info!(path = %path.display(), users = state.users.len(), "store loaded");
        Ok(Self {
            path: Some(path),
            daily_quota,
            state: Mutex::new(state),
        })
    }

    pub fn in_memory(daily_quota: u32) -> Self {
        Self {
            path: None,
            daily_quota,
            state: Mutex::new(StoreFile::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreFile> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &StoreFile) -> Result<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, state),
            None => Ok(()),
        }
    }

    /// Apply `f` to a copy of the record; memory only changes once the file does.
    fn mutate<T>(&self, user: UserId, f: impl FnOnce(&mut UserRecord) -> T) -> Result<T> {
        let mut state = self.lock();
        let mut record = state.users.get(&user.0).cloned().unwrap_or_default();
        let out = f(&mut record);

        let previous = state.users.insert(user.0, record);
        if let Err(e) = self.persist(&state) {
            match previous {
                Some(old) => state.users.insert(user.0, old),
                None => state.users.remove(&user.0),
            };
            tracing::warn!(user = user.0, error = %e, "store write failed, change rolled back");
            return Err(e);
        }
        Ok(out)
    }

    pub fn set_session(&self, user: UserId, token: SessionToken) -> Result<()> {
        self.mutate(user, |r| r.session = Some(token.0))
    }

    pub fn clear_session(&self, user: UserId) -> Result<()> {
        self.mutate(user, |r| r.session = None)
    }

    pub fn has_session(&self, user: UserId) -> bool {
        self.lock()
            .users
            .get(&user.0)
            .is_some_and(|r| r.session.is_some())
    }

    pub fn update_settings(
        &self,
        user: UserId,
        f: impl FnOnce(&mut TransferSettings),
    ) -> Result<()> {
        self.mutate(user, |r| f(&mut r.settings))
    }

    /// Requests left today; `None` when unlimited.
    pub fn remaining_today(&self, user: UserId) -> Option<u32> {
        if self.daily_quota == 0 {
            return None;
        }
        let today = today();
        let state = self.lock();
        let used = state
            .users
            .get(&user.0)
            .filter(|r| r.quota_day.as_deref() == Some(today.as_str()))
            .map(|r| r.quota_used)
            .unwrap_or(0);
        Some(self.daily_quota.saturating_sub(used))
    }

    fn consume_on(&self, user: UserId, day: String) -> Result<bool> {
        let limit = self.daily_quota;
        self.mutate(user, |r| {
            if r.quota_day.as_deref() != Some(day.as_str()) {
                r.quota_day = Some(day);
                r.quota_used = 0;
            }
            if limit != 0 && r.quota_used >= limit {
                return false;
            }
            r.quota_used += 1;
            true
        })
    }
}

fn today() -> String {
    Local::now().date_naive().to_string()
}

#[async_trait]
impl QuotaStore for FileStore {
    async fn consume(&self, user: UserId) -> Result<bool> {
        self.consume_on(user, today())
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn get(&self, user: UserId) -> Result<TransferSettings> {
        Ok(self
            .lock()
            .users
            .get(&user.0)
            .map(|r| r.settings.clone())
            .unwrap_or_default())
    }

    async fn take_index(&self, user: UserId) -> Result<u64> {
        self.mutate(user, |r| {
            let old = r.index_count;
            r.index_count += 1;
            old
        })
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn get(&self, user: UserId) -> Result<Option<SessionToken>> {
        Ok(self
            .lock()
            .users
            .get(&user.0)
            .and_then(|r| r.session.clone())
            .map(SessionToken))
    }
}
