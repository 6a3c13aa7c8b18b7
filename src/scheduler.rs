use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::coordinator::GenerationCoordinator;
use crate::error::ChatError;

/// Periodic and on-demand generation triggers, all routed through the
/// coordinator.
#[derive(Clone)]
pub struct Scheduler {
    coordinator: Arc<GenerationCoordinator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(coordinator: Arc<GenerationCoordinator>, interval: Duration) -> Self {
        Scheduler {
            coordinator,
            interval,
        }
    }

    pub fn tick(&self) {
        for room_id in self.coordinator.room_ids() {
            match self.coordinator.trigger_generation(room_id) {
                Ok(started) => debug!("Tick for room {}: started={}", room_id, started),
                Err(e) => error!("Tick for room {} failed: {}", room_id, e),
            }
        }
    }

    /// Call after a user message has been appended.
    pub fn on_user_message(&self, room_id: &str) -> Result<bool, ChatError> {
        self.coordinator.trigger_generation(room_id)
    }

    /// Kicks every room that has no messages yet.
    pub async fn start_empty_rooms(&self) {
        for room_id in self.coordinator.room_ids() {
            match self.coordinator.store().len(room_id).await {
                Ok(0) => {
                    info!("Room {} is empty; generating first message", room_id);
                    if let Err(e) = self.coordinator.trigger_generation(room_id) {
                        error!("Initial generation for room {} failed: {}", room_id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Cannot inspect room {}: {}", room_id, e),
            }
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!("Scheduler running every {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::FakeGenerator;
    use crate::coordinator::GenerationSettings;
    use crate::messages::Message;
    use crate::room::Room;
    use crate::store::MessageStore;

    const REPLY: &str = "[01/01/2024, 10:00:00] Alice: hello there";

    fn setup(
        generator: &Arc<FakeGenerator>,
    ) -> (tempfile::TempDir, Arc<GenerationCoordinator>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MessageStore::new(
            dir.path().join("messages.json"),
            ["a".to_string(), "b".to_string()],
        ));
        let rooms = ["a", "b"]
            .into_iter()
            .map(|id| {
                Room::new(
                    id.to_string(),
                    id.to_uppercase(),
                    String::new(),
                    None,
                    generator.clone(),
                )
            })
            .collect();
        let coordinator = Arc::new(GenerationCoordinator::new(
            rooms,
            store,
            GenerationSettings::default(),
        ));
        (dir, coordinator)
    }

    #[tokio::test]
    async fn tick_triggers_every_room() {
        let generator = Arc::new(FakeGenerator::replying(REPLY));
        let (_dir, coordinator) = setup(&generator);
        let scheduler = Scheduler::new(Arc::clone(&coordinator), Duration::from_secs(300));

        scheduler.tick();
        coordinator.wait_for_attempts().await;

        assert_eq!(generator.call_count(), 2);
        assert_eq!(coordinator.store().len("a").await.unwrap(), 1);
        assert_eq!(coordinator.store().len("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn only_empty_rooms_are_kicked_at_startup() {
        let generator = Arc::new(FakeGenerator::replying(REPLY));
        let (_dir, coordinator) = setup(&generator);
        let m = Message::from_user("Bob".to_string(), "already here".to_string());
        coordinator.store().append("a", m).await.unwrap();
        let scheduler = Scheduler::new(Arc::clone(&coordinator), Duration::from_secs(300));

        scheduler.start_empty_rooms().await;
        coordinator.wait_for_attempts().await;

        assert_eq!(generator.call_count(), 1);
        assert_eq!(coordinator.store().len("a").await.unwrap(), 1);
        assert_eq!(coordinator.store().len("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn loop_ticks_until_shutdown() {
        let generator = Arc::new(FakeGenerator::replying(REPLY));
        let (_dir, coordinator) = setup(&generator);
        let scheduler = Scheduler::new(Arc::clone(&coordinator), Duration::from_millis(20));
        let (tx, rx) = watch::channel(false);

        let handle = scheduler.spawn(rx);
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        coordinator.wait_for_attempts().await;

        let calls = generator.call_count();
        assert!(calls >= 2, "expected ticks, got {} calls", calls);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(generator.call_count(), calls);
    }

    #[tokio::test]
    async fn user_message_hook_reaches_coordinator() {
        let generator = Arc::new(FakeGenerator::replying(REPLY));
        let (_dir, coordinator) = setup(&generator);
        let scheduler = Scheduler::new(Arc::clone(&coordinator), Duration::from_secs(300));

        assert!(scheduler.on_user_message("a").unwrap());
        assert!(scheduler.on_user_message("zzz").is_err());
        coordinator.wait_for_attempts().await;
        assert_eq!(generator.call_count(), 1);
    }
}
