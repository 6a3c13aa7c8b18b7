use std::sync::Arc;

use log::{error, info};

use crate::coordinator::GenerationCoordinator;
use crate::error::ChatError;
use crate::messages::{ListMessagesResponse, Message, RoomStatus};
use crate::pagination::PaginationService;
use crate::room::RoomInfo;
use crate::scheduler::Scheduler;

const ANONYMOUS_SENDER: &str = "Anonymous";

#[derive(Clone)]
pub struct Server {
    coordinator: Arc<GenerationCoordinator>,
    scheduler: Scheduler,
    pagination: PaginationService,
    default_page_size: usize,
    max_page_size: usize,
}

impl Server {
    pub fn new(
        coordinator: Arc<GenerationCoordinator>,
        scheduler: Scheduler,
        default_page_size: usize,
        max_page_size: usize,
    ) -> Self {
        let pagination = PaginationService::new(Arc::clone(coordinator.store()));
        Server {
            coordinator,
            scheduler,
            pagination,
            default_page_size,
            max_page_size,
        }
    }

    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.coordinator.room_infos()
    }

    pub async fn list_messages(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<ListMessagesResponse, ChatError> {
        let room = self.coordinator.room(room_id)?.info.clone();
        let page = self.pagination.list(room_id, limit, before).await?;

        Ok(ListMessagesResponse {
            room,
            messages: page.messages,
            is_generating: self.coordinator.is_generating(room_id)?,
            has_more: page.has_more,
            oldest_message_id: page.oldest_message_id,
            total_count: page.total_count,
        })
    }

    /// Appends a user message, then triggers generation so the new message
    /// is part of the next context window.
    pub async fn send_message(
        &self,
        room_id: &str,
        sender: &str,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.coordinator.room(room_id)?;

        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidInput(
                "content must not be empty".to_string(),
            ));
        }
        let sender = match sender.trim() {
            "" => ANONYMOUS_SENDER,
            name => name,
        };

        let message = Message::from_user(sender.to_string(), content.to_string());
        self.coordinator
            .store()
            .append(room_id, message.clone())
            .await?;
        info!("Room {}: {} sent message {}", room_id, sender, message.id);

        if let Err(e) = self.scheduler.on_user_message(room_id) {
            error!("Failed to trigger generation for room {}: {}", room_id, e);
        }
        Ok(message)
    }

    pub async fn status(&self, room_id: &str) -> Result<RoomStatus, ChatError> {
        Ok(RoomStatus {
            is_generating: self.coordinator.is_generating(room_id)?,
            message_count: self.coordinator.store().len(room_id).await?,
        })
    }
}
