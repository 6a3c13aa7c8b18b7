use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::ChatError;
use crate::messages::Message;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Default)]
struct RoomLog {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl RoomLog {
    fn from_messages(room_id: &str, messages: Vec<Message>) -> Self {
        let mut log = RoomLog::default();
        for message in messages {
            if log.ids.contains(&message.id) {
                warn!("Skipping duplicate message {} in room {}", message.id, room_id);
                continue;
            }
            log.ids.insert(message.id.clone());
            log.messages.push(message);
        }
        log
    }
}

/// Append-only message log per room, persisted as one JSON snapshot.
pub struct MessageStore {
    path: PathBuf,
    rooms: HashMap<String, RwLock<RoomLog>>,
    save_lock: Mutex<()>,
}

impl MessageStore {
    pub fn new(path: impl Into<PathBuf>, room_ids: impl IntoIterator<Item = String>) -> Self {
        MessageStore {
            path: path.into(),
            rooms: room_ids
                .into_iter()
                .map(|id| (id, RwLock::new(RoomLog::default())))
                .collect(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn room(&self, room_id: &str) -> Result<&RwLock<RoomLog>, ChatError> {
        self.rooms
            .get(room_id)
            .ok_or_else(|| ChatError::UnknownRoom(room_id.to_string()))
    }

    /// Replaces in-memory state with the persisted snapshot. Never fails:
    /// a missing or unreadable file leaves every room empty.
    pub async fn load(&self) {
        let mut snapshot = match fs::read_to_string(&self.path).await {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, Vec<Message>>>(&text) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(
                        "Malformed message file {}: {}; starting empty",
                        self.path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No message file at {}; starting empty", self.path.display());
                BTreeMap::new()
            }
            Err(e) => {
                error!(
                    "Failed to read message file {}: {}; starting empty",
                    self.path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        for (room_id, log) in &self.rooms {
            let messages = snapshot.remove(room_id).unwrap_or_default();
            let mut log = log.write().await;
            *log = RoomLog::from_messages(room_id, messages);
            info!("Loaded {} messages for room {}", log.messages.len(), room_id);
        }

        for room_id in snapshot.keys() {
            warn!("Ignoring messages for unconfigured room {}", room_id);
        }
    }

    /// Appends to the end of the room's log, then persists. A failed write is
    /// logged and retried by the next mutation; the message stays in memory.
    pub async fn append(&self, room_id: &str, message: Message) -> Result<(), ChatError> {
        {
            let mut log = self.room(room_id)?.write().await;
            if !log.ids.insert(message.id.clone()) {
                return Err(ChatError::DuplicateMessage(message.id));
            }
            debug!("Appending message {} to room {}", message.id, room_id);
            log.messages.push(message);
        }

        if let Err(e) = self.save().await {
            error!(
                "Failed to persist messages to {}: {}",
                self.path.display(),
                e
            );
        }
        Ok(())
    }

    /// Runs `f` against a consistent view of the room's messages: either
    /// before or after any concurrent append, never in between.
    pub async fn snapshot<R>(
        &self,
        room_id: &str,
        f: impl FnOnce(&[Message]) -> R,
    ) -> Result<R, ChatError> {
        let log = self.room(room_id)?.read().await;
        Ok(f(&log.messages))
    }

    pub async fn recent(&self, room_id: &str, n: usize) -> Result<Vec<Message>, ChatError> {
        self.snapshot(room_id, |messages| {
            messages[messages.len().saturating_sub(n)..].to_vec()
        })
        .await
    }

    pub async fn len(&self, room_id: &str) -> Result<usize, ChatError> {
        self.snapshot(room_id, <[Message]>::len).await
    }

    /// Writes the full state to a temp file and renames it over the snapshot.
    pub async fn save(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;

        let mut snapshot = BTreeMap::new();
        for (room_id, log) in &self.rooms {
            snapshot.insert(room_id.as_str(), log.read().await.messages.clone());
        }
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store_at(path: PathBuf) -> MessageStore {
        MessageStore::new(path, ["general".to_string(), "random".to_string()])
    }

    fn message(content: &str) -> Message {
        Message::from_user("Alice".to_string(), content.to_string())
    }

    #[tokio::test]
    async fn append_keeps_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path().join("messages.json"));

        for i in 0..5 {
            store.append("general", message(&format!("msg {}", i))).await.unwrap();
        }

        let contents: Vec<String> = store
            .snapshot("general", <[Message]>::to_vec)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
        assert_eq!(store.len("random").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_room_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path().join("messages.json"));

        let err = store.append("nowhere", message("hello")).await.unwrap_err();
        assert_eq!(err, ChatError::UnknownRoom("nowhere".to_string()));
        assert!(store.len("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path().join("messages.json"));
        let m = message("hello");

        store.append("general", m.clone()).await.unwrap();
        let err = store.append("general", m.clone()).await.unwrap_err();

        assert_eq!(err, ChatError::DuplicateMessage(m.id));
        assert_eq!(store.len("general").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("messages.json");
        let store = store_at(path.clone());
        for i in 0..3 {
            store.append("general", message(&format!("g{}", i))).await.unwrap();
        }
        store.append("random", message("r0")).await.unwrap();

        let fresh = store_at(path.clone());
        fresh.load().await;

        assert_eq!(
            fresh.snapshot("general", <[Message]>::to_vec).await.unwrap(),
            store.snapshot("general", <[Message]>::to_vec).await.unwrap()
        );
        assert_eq!(
            fresh.snapshot("random", <[Message]>::to_vec).await.unwrap(),
            store.snapshot("random", <[Message]>::to_vec).await.unwrap()
        );
        assert!(!dir.path().join("nested").join("messages.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path().join("absent.json"));
        store.load().await;
        assert_eq!(store.len("general").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = store_at(path);
        store.load().await;
        assert_eq!(store.len("general").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn load_ignores_unconfigured_rooms_and_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let m = message("hello");
        let snapshot = serde_json::json!({
            "general": [m, m],
            "elsewhere": [message("lost")],
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();

        let store = store_at(path);
        store.load().await;
        assert_eq!(store.len("general").await.unwrap(), 1);
        assert!(store.len("elsewhere").await.is_err());
    }

    #[tokio::test]
    async fn write_failure_keeps_messages_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = store_at(blocker.join("messages.json"));

        store.append("general", message("still here")).await.unwrap();

        assert_eq!(store.len("general").await.unwrap(), 1);
        assert!(store.save().await.is_err());
    }

    #[tokio::test]
    async fn recent_returns_tail_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path().join("messages.json"));
        for i in 0..12 {
            store.append("general", message(&format!("m{}", i))).await.unwrap();
        }

        let recent = store.recent("general", 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[9].content, "m11");
        assert_eq!(store.recent("random", 10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn concurrent_appends_across_rooms_are_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let store = Arc::new(store_at(path.clone()));

        let mut handles = Vec::new();
        for room in ["general", "random"] {
            for i in 0..10 {
                let store = Arc::clone(&store);
                handles.push(tokio::spawn(async move {
                    store.append(room, message(&format!("{} {}", room, i))).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let fresh = store_at(path);
        fresh.load().await;
        assert_eq!(fresh.len("general").await.unwrap(), 10);
        assert_eq!(fresh.len("random").await.unwrap(), 10);
    }
}
