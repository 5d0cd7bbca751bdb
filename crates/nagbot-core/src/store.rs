use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::info;

use crate::{
    domain::{ChatId, UserRecord},
    Result,
};

/// Persistence port for user records.
///
/// The core treats this as synchronous and always available; every mutation
/// that must survive a restart is followed by a `save`.
pub trait UserStore: Send + Sync {
    fn load(&self, chat_id: ChatId) -> Option<UserRecord>;
    fn save(&self, user: &UserRecord) -> Result<()>;
    fn exists(&self, chat_id: ChatId) -> bool;
    fn load_all(&self) -> Vec<UserRecord>;
}

/// File-backed store: the whole record map lives in memory and is rewritten
/// to one JSON file on every save.
pub struct JsonUserStore {
    path: PathBuf,
    records: Mutex<HashMap<i64, UserRecord>>,
}

impl JsonUserStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let users: Vec<UserRecord> = serde_json::from_str(&content)?;
            users.into_iter().map(|u| (u.chat_id.0, u)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &HashMap<i64, UserRecord>) -> Result<()> {
        let mut users: Vec<&UserRecord> = records.values().collect();
        users.sort_by_key(|u| u.chat_id.0);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash mid-write cannot truncate the store.
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, serde_json::to_string_pretty(&users)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

impl UserStore for JsonUserStore {
    fn load(&self, chat_id: ChatId) -> Option<UserRecord> {
        self.records
            .lock()
            .expect("user store lock poisoned")
            .get(&chat_id.0)
            .cloned()
    }

    fn save(&self, user: &UserRecord) -> Result<()> {
        let mut records = self.records.lock().expect("user store lock poisoned");
        records.insert(user.chat_id.0, user.clone());
        self.persist(&records)
    }

    fn exists(&self, chat_id: ChatId) -> bool {
        self.records
            .lock()
            .expect("user store lock poisoned")
            .contains_key(&chat_id.0)
    }

    fn load_all(&self) -> Vec<UserRecord> {
        let records = self.records.lock().expect("user store lock poisoned");
        let mut users: Vec<UserRecord> = records.values().cloned().collect();
        users.sort_by_key(|u| u.chat_id.0);
        users
    }
}

/// Startup reconciliation: delivery loops are not restored across a process
/// restart, so any persisted `active = true` flag is stale. Treat those users
/// as stopped and correct the flag. Returns how many records were corrected.
pub fn reconcile_active_flags(store: &dyn UserStore) -> Result<usize> {
    let mut corrected = 0usize;
    for mut user in store.load_all() {
        if !user.active {
            continue;
        }
        user.active = false;
        store.save(&user)?;
        info!(chat_id = user.chat_id.0, "cleared stale active flag");
        corrected += 1;
    }
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> JsonUserStore {
        JsonUserStore::open(dir.path().join("users.json")).unwrap()
    }

    #[test]
    fn save_then_reopen_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        let store = JsonUserStore::open(&path).unwrap();
        let mut user = UserRecord::new(ChatId(7), 45);
        user.add_notification("Buy milk".to_string());
        store.save(&user).unwrap();

        let reopened = JsonUserStore::open(&path).unwrap();
        assert_eq!(reopened.load(ChatId(7)), Some(user));
        assert!(reopened.exists(ChatId(7)));
        assert!(!reopened.exists(ChatId(8)));
    }

    #[test]
    fn load_missing_user_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load(ChatId(1)), None);
    }

    #[test]
    fn reconcile_clears_stale_active_flags() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut a = UserRecord::new(ChatId(1), 45);
        a.active = true;
        let b = UserRecord::new(ChatId(2), 45);
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let corrected = reconcile_active_flags(&store).unwrap();
        assert_eq!(corrected, 1);
        assert!(!store.load(ChatId(1)).unwrap().active);
        assert!(!store.load(ChatId(2)).unwrap().active);
    }
}
