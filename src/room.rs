use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::generator::Generator;
use crate::parser::MessageParser;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

/// A configured chat room. Immutable once registered.
#[derive(Clone)]
pub struct Room {
    pub info: RoomInfo,
    parser: MessageParser,
    generator: Arc<dyn Generator>,
}

impl Room {
    pub fn new(
        id: String,
        display_name: String,
        description: String,
        system_sender: Option<String>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let parser = MessageParser::new(system_sender.unwrap_or_else(|| display_name.clone()));

        Room {
            info: RoomInfo {
                id,
                display_name,
                description,
            },
            parser,
            generator,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }
}
