use serde::{Deserialize, Serialize};

use crate::capability::ProgressNotice;
use crate::layout::LayoutSettings;

/// Who produced a chat event. Only `Ai` appears on the wire (`role: "ai"`);
/// human-sourced events omit the field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai")]
    Ai,
}

/// The unit of information flowing through the relay.
///
/// Every event is self-describing via its `type` tag; consumers never infer
/// kind from payload shape. Wire names match what the overlay widgets expect.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayEvent {
    #[serde(rename = "text")]
    Text {
        payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    #[serde(rename = "image")]
    Image {
        payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    #[serde(rename = "link")]
    Link {
        payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    #[serde(rename = "url")]
    Url {
        payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    #[serde(rename = "system")]
    System { payload: String },
    #[serde(rename = "typing")]
    Typing { payload: bool },
    #[serde(rename = "llm-progress")]
    LlmProgress { payload: ProgressNotice },
    #[serde(rename = "layout-update")]
    LayoutUpdate { payload: LayoutSettings },
}

impl OverlayEvent {
    /// Fallback text event from a human producer.
    pub fn user_text(payload: impl Into<String>) -> Self {
        Self::Text {
            payload: payload.into(),
            role: None,
        }
    }

    /// A generated reaction, displayed on the AI side of the chat feed.
    pub fn ai_text(payload: impl Into<String>) -> Self {
        Self::Text {
            payload: payload.into(),
            role: Some(Role::Ai),
        }
    }

    pub fn typing(active: bool) -> Self {
        Self::Typing { payload: active }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Link { .. } => "link",
            Self::Url { .. } => "url",
            Self::System { .. } => "system",
            Self::Typing { .. } => "typing",
            Self::LlmProgress { .. } => "llm-progress",
            Self::LayoutUpdate { .. } => "layout-update",
        }
    }

    /// Control/meta events never qualify for generation augmentation.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Typing { .. } | Self::LlmProgress { .. } | Self::LayoutUpdate { .. }
        )
    }

    /// The payload a generated reaction should react to, if this event
    /// qualifies: user content of kind text/image/link/url with a non-empty
    /// payload. `system` and control events return None.
    pub fn reaction_context(&self) -> Option<&str> {
        match self {
            Self::Text { payload, .. }
            | Self::Image { payload, .. }
            | Self::Link { payload, .. }
            | Self::Url { payload, .. } => {
                if payload.trim().is_empty() {
                    None
                } else {
                    Some(payload.as_str())
                }
            }
            _ => None,
        }
    }
}

/// Parse a raw producer frame. Malformed or unrecognized input is never
/// dropped: it becomes a plain text event wrapping the raw string.
pub fn parse_inbound(raw: &str) -> OverlayEvent {
    serde_json::from_str(raw).unwrap_or_else(|_| OverlayEvent::user_text(raw))
}
