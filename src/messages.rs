use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::room::RoomInfo;

const DISPLAY_FORMAT: &str = "[%d/%m/%Y, %H:%M:%S]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub timestamp: String,
    pub sender: String,
    pub content: String,
    pub is_user: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_user(sender: String, content: String) -> Self {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4().to_string(),
            timestamp: display_timestamp(&now.with_timezone(&Local)),
            sender,
            content,
            is_user: true,
            created_at: now,
        }
    }

    /// Renders the message the way it appears in a generator context window.
    pub fn context_line(&self) -> String {
        format!("{} {}: {}", self.timestamp, self.sender, self.content)
    }
}

/// `[DD/MM/YYYY, HH:MM:SS]`
pub fn display_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(DISPLAY_FORMAT).to_string()
}

/// A parsed generator line that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    // Kept for logging only; the committed message is stamped with receipt time.
    pub generated_timestamp: String,
}

impl MessageDraft {
    pub fn new(sender: String, content: String, generated_timestamp: String) -> Self {
        MessageDraft {
            id: Uuid::new_v4().to_string(),
            sender,
            content,
            created_at: Utc::now(),
            generated_timestamp,
        }
    }

    pub fn into_message(self, received_at: DateTime<Utc>) -> Message {
        Message {
            id: self.id,
            timestamp: display_timestamp(&received_at.with_timezone(&Local)),
            sender: self.sender,
            content: self.content,
            is_user: false,
            created_at: received_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub sender: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<usize>,
    pub before: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesResponse {
    pub room: RoomInfo,
    pub messages: Vec<Message>,
    pub is_generating: bool,
    pub has_more: bool,
    pub oldest_message_id: Option<String>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: Message,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub is_generating: bool,
    pub message_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
