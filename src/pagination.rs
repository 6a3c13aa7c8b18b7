use std::sync::Arc;

use crate::error::ChatError;
use crate::messages::Message;
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub oldest_message_id: Option<String>,
    pub total_count: usize,
}

/// Cursor pagination over an ordered slice. An unknown `before` id behaves
/// as if no cursor was given. A zero `limit` is treated as one.
pub fn paginate(messages: &[Message], limit: usize, before: Option<&str>) -> Page {
    let limit = limit.max(1);
    let total = messages.len();

    let end = before
        .and_then(|id| messages.iter().position(|m| m.id == id))
        .unwrap_or(total);
    let start = end.saturating_sub(limit);
    let page = messages[start..end].to_vec();

    Page {
        oldest_message_id: page.first().map(|m| m.id.clone()),
        messages: page,
        has_more: start > 0,
        total_count: total,
    }
}

/// Read-only queries against the store; never blocks generation for long.
#[derive(Clone)]
pub struct PaginationService {
    store: Arc<MessageStore>,
}

impl PaginationService {
    pub fn new(store: Arc<MessageStore>) -> Self {
        PaginationService { store }
    }

    pub async fn list(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Page, ChatError> {
        self.store
            .snapshot(room_id, |messages| paginate(messages, limit, before))
            .await
    }
}
