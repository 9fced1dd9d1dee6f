// Messages exchanged with the panel host, one JSON object per line

use serde::{Deserialize, Serialize};

use crate::relay::DisplayEvent;

/// Inbound from the panel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PanelCommand {
    /// The user asked something
    Chat { text: String },
    /// Any command this relay does not handle
    #[serde(other)]
    Unknown,
}

impl PanelCommand {
    pub fn parse(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }
}

/// Outbound to the panel. Errors travel as `chatResponse` too, marked only
/// by their `Error: ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PanelMessage {
    ChatResponse { text: String },
}

impl PanelMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<DisplayEvent> for PanelMessage {
    fn from(event: DisplayEvent) -> Self {
        Self::ChatResponse {
            text: event.into_text(),
        }
    }
}
