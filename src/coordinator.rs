use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::JoinSet;

use crate::error::ChatError;
use crate::generator::GeneratorError;
use crate::messages::Message;
use crate::room::{Room, RoomInfo};
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: usize,
    pub temperature: f32,
    pub context_window: usize,
    pub timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        GenerationSettings {
            max_tokens: 500,
            temperature: 1.0,
            context_window: 10,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Rejected,
    Failed,
}

// Clears the generating flag on every exit path, including abort and panic.
struct GeneratingGuard(Arc<AtomicBool>);

impl Drop for GeneratingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct RoomSlot {
    room: Arc<Room>,
    generating: Arc<AtomicBool>,
}

/// Owns the per-room single-flight flag and runs generation attempts.
pub struct GenerationCoordinator {
    slots: Vec<RoomSlot>,
    index: HashMap<String, usize>,
    store: Arc<MessageStore>,
    settings: GenerationSettings,
    tasks: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

impl GenerationCoordinator {
    pub fn new(rooms: Vec<Room>, store: Arc<MessageStore>, settings: GenerationSettings) -> Self {
        let slots: Vec<RoomSlot> = rooms
            .into_iter()
            .map(|room| RoomSlot {
                room: Arc::new(room),
                generating: Arc::new(AtomicBool::new(false)),
            })
            .collect();
        let index = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.room.id().to_string(), i))
            .collect();

        GenerationCoordinator {
            slots,
            index,
            store,
            settings,
            tasks: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
        }
    }

    fn slot(&self, room_id: &str) -> Result<&RoomSlot, ChatError> {
        self.index
            .get(room_id)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| ChatError::UnknownRoom(room_id.to_string()))
    }

    pub fn room(&self, room_id: &str) -> Result<&Room, ChatError> {
        self.slot(room_id).map(|slot| slot.room.as_ref())
    }

    pub fn room_infos(&self) -> Vec<RoomInfo> {
        self.slots.iter().map(|slot| slot.room.info.clone()).collect()
    }

    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.room.id())
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn is_generating(&self, room_id: &str) -> Result<bool, ChatError> {
        self.slot(room_id)
            .map(|slot| slot.generating.load(Ordering::Acquire))
    }

    /// Starts a background attempt unless one is already running for the
    /// room. Returns whether an attempt was started; a dropped trigger is
    /// not queued.
    pub fn trigger_generation(self: &Arc<Self>, room_id: &str) -> Result<bool, ChatError> {
        let slot = self.slot(room_id)?;

        // Checked under the task lock so nothing is spawned after shutdown
        // has taken the set.
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.accepting.load(Ordering::Acquire) {
            debug!("Ignoring trigger for room {} during shutdown", room_id);
            return Ok(false);
        }

        if slot
            .generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Room {} is already generating; trigger dropped", room_id);
            return Ok(false);
        }

        let guard = GeneratingGuard(Arc::clone(&slot.generating));
        let room = Arc::clone(&slot.room);
        let this = Arc::clone(self);

        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _guard = guard;
            let outcome = this.attempt(&room).await;
            debug!("Room {}: attempt finished as {:?}", room.id(), outcome);
        });

        Ok(true)
    }

    fn build_context(messages: &[Message]) -> String {
        messages
            .iter()
            .map(Message::context_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub(crate) async fn attempt(&self, room: &Room) -> Outcome {
        let room_id = room.id();

        let context = match self.store.recent(room_id, self.settings.context_window).await {
            Ok(messages) => Self::build_context(&messages),
            Err(e) => {
                error!("Cannot build context for room {}: {}", room_id, e);
                return Outcome::Failed;
            }
        };

        let call = room.generator().generate(
            &context,
            self.settings.max_tokens,
            self.settings.temperature,
        );
        let raw = match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("Generation failed for room {}: {}", room_id, e);
                return Outcome::Failed;
            }
            Err(_) => {
                let e = GeneratorError::TimedOut(self.settings.timeout);
                warn!("Generation failed for room {}: {}", room_id, e);
                return Outcome::Failed;
            }
        };

        let Some(draft) = room.parser().extract_first_valid(&raw) else {
            info!("No acceptable line in generated text for room {}", room_id);
            return Outcome::Rejected;
        };

        debug!(
            "Replacing generated timestamp {} with receipt time",
            draft.generated_timestamp
        );
        let message = draft.into_message(Utc::now());
        let (id, sender) = (message.id.clone(), message.sender.clone());

        match self.store.append(room_id, message).await {
            Ok(()) => {
                info!("Room {}: committed message {} from {}", room_id, id, sender);
                Outcome::Committed
            }
            Err(e) => {
                error!("Room {}: failed to commit generated message: {}", room_id, e);
                Outcome::Failed
            }
        }
    }

    /// Stops accepting triggers, waits up to `grace` for in-flight attempts,
    /// then aborts whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);

        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if tasks.is_empty() {
            return;
        }

        info!("Waiting for {} generation attempts to finish", tasks.len());
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} unfinished generation attempts", tasks.len());
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        for slot in &self.slots {
            slot.generating.store(false, Ordering::Release);
        }
    }

    #[cfg(test)]
    pub async fn wait_for_attempts(&self) {
        loop {
            let mut tasks =
                std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
            if tasks.is_empty() {
                return;
            }
            while tasks.join_next().await.is_some() {}
        }
    }
}
