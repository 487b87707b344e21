pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::constants::{CHARS_PER_TOKEN, SERVERS_FILE, STATS_FILE, USERS_FILE};
use crate::error::StoreError;
use crate::horde::{Horde, HordeState};
use crate::model::{Stats, User, Worker};

/// Loads/saves the three JSON snapshot files and hosts no state of its own —
/// `HordeState` is the single source of truth once loaded.
pub struct Store {
    pub db_dir: PathBuf,
}

impl Store {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self { db_dir: db_dir.into() }
    }

    fn users_path(&self) -> PathBuf {
        self.db_dir.join(USERS_FILE)
    }

    fn servers_path(&self) -> PathBuf {
        self.db_dir.join(SERVERS_FILE)
    }

    fn stats_path(&self) -> PathBuf {
        self.db_dir.join(STATS_FILE)
    }

    /// Load order: users (creating anon if absent), then workers, then stats.
    pub async fn load(&self, now: DateTime<Utc>, to_tokens: bool) -> Result<HordeState, StoreError> {
        tokio::fs::create_dir_all(&self.db_dir)
            .await
            .map_err(|source| io_err(&self.db_dir, source))?;

        let mut users = read_json_array(&self.users_path()).await?;
        if to_tokens {
            for user in users.iter_mut() {
                schema::migrate_chars_to_tokens(user);
            }
        }
        let mut users: Vec<User> = users
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|source| serde_err(USERS_FILE, source)))
            .collect::<Result<_, _>>()?;

        if !users.iter().any(|u| u.is_anon()) {
            users.push(User::new_anon(now));
        }

        let mut workers = read_json_array(&self.servers_path()).await?;
        if to_tokens {
            for worker in workers.iter_mut() {
                schema::migrate_chars_to_tokens(worker);
            }
        }
        let workers: Vec<Worker> = workers
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|source| serde_err(SERVERS_FILE, source)))
            .collect::<Result<_, _>>()?;

        let mut stats = match read_json_object(&self.stats_path()).await? {
            Some(mut raw) => {
                if to_tokens {
                    schema::migrate_chars_to_tokens(&mut raw);
                }
                serde_json::from_value(raw).map_err(|source| serde_err(STATS_FILE, source))?
            }
            None => Stats::new(now),
        };
        stats.last_pruning = now;

        let next_user_id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;

        let mut state = HordeState::new(now);
        state.stats = stats;
        for user in users {
            state.users.insert(user.oauth_id.clone(), user);
        }
        for worker in workers {
            state.workers.insert(worker.name.clone(), worker);
        }
        state.set_next_user_id(next_user_id);

        Ok(state)
    }

    /// Writes the three snapshot files. Workers owned by the anonymous user
    /// are excluded, matching the upstream convention that anon capacity is
    /// never durable across a restart.
    pub async fn snapshot(&self, horde: &Horde) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.db_dir)
            .await
            .map_err(|source| io_err(&self.db_dir, source))?;

        let (users, workers, stats) = {
            let state = horde.lock().await;
            let users: Vec<User> = state.users.values().cloned().collect();
            let workers: Vec<Worker> = state
                .workers
                .values()
                .filter(|w| !state.users.get(&w.owner).map(|u| u.is_anon()).unwrap_or(true))
                .cloned()
                .collect();
            let stats = state.stats.clone();
            (users, workers, stats)
        };

        write_json_atomic(&self.users_path(), &users).await?;
        write_json_atomic(&self.servers_path(), &workers).await?;
        write_json_atomic(&self.stats_path(), &stats).await?;
        Ok(())
    }
}

async fn read_json_array(path: &Path) -> Result<Vec<Value>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|source| serde_err(&path.display().to_string(), source))?;
            Ok(value.as_array().cloned().unwrap_or_default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(io_err(path, source)),
    }
}

async fn read_json_object(path: &Path) -> Result<Option<Value>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|source| serde_err(&path.display().to_string(), source))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_err(path, source)),
    }
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|source| serde_err(&path.display().to_string(), source))?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &body)
        .await
        .map_err(|source| io_err(&tmp_path, source))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| io_err(path, source))?;
    Ok(())
}

fn io_err(path: impl AsRef<Path>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}

fn serde_err(file: &str, source: serde_json::Error) -> StoreError {
    StoreError::Serde {
        file: file.to_string(),
        source,
    }
}

/// `tokens := round(chars / CHARS_PER_TOKEN)`, matching the on-disk legacy format.
pub fn chars_to_tokens(chars: f64) -> i64 {
    (chars / CHARS_PER_TOKEN).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::oracle::StubOracle;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn load_creates_anon_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        let state = store.load(now(), false).await.unwrap();
        assert!(state.users.values().any(|u| u.is_anon()));
    }

    #[tokio::test]
    async fn snapshot_round_trip_preserves_users() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        let state = store.load(now(), false).await.unwrap();
        let horde = Horde::new(state, Arc::new(StubOracle::default()), Default::default());
        horde.create_user("google|1", "alice", "key-a", now()).await;

        store.snapshot(&horde).await.unwrap();

        let reloaded = store.load(now(), false).await.unwrap();
        assert!(reloaded.users.contains_key("google|1"));
        // anon must not be duplicated across a reload
        assert_eq!(reloaded.users.values().filter(|u| u.is_anon()).count(), 1);
    }

    #[tokio::test]
    async fn snapshot_excludes_anon_owned_workers() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        let state = store.load(now(), false).await.unwrap();
        let horde = Horde::new(state, Arc::new(StubOracle::default()), Default::default());
        horde.create_worker("anon-worker", "anon", vec![]).await;

        store.snapshot(&horde).await.unwrap();

        let reloaded = store.load(now(), false).await.unwrap();
        assert!(!reloaded.workers.contains_key("anon-worker"));
    }

    #[test]
    fn chars_to_tokens_applies_ratio() {
        assert_eq!(chars_to_tokens(400.0), 100);
    }
}
