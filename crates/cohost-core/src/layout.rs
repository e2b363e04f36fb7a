use serde::{Deserialize, Serialize};

/// Overlay layout toggles shared by every connected display.
///
/// Always a complete value: defaults are applied at startup and partial
/// updates merge into the existing value, never replace it wholesale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSettings {
    pub show_face_cam: bool,
    pub show_hand_cam: bool,
    pub show_room_cam: bool,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            show_face_cam: true,
            show_hand_cam: true,
            show_room_cam: true,
        }
    }
}

/// A partial layout update. Absent keys leave the current value untouched.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_face_cam: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_hand_cam: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_room_cam: Option<bool>,
}

impl LayoutSettings {
    /// Shallow-merge `patch` over `self`. Associative and order-independent
    /// for disjoint key sets.
    pub fn merge(self, patch: &LayoutPatch) -> Self {
        Self {
            show_face_cam: patch.show_face_cam.unwrap_or(self.show_face_cam),
            show_hand_cam: patch.show_hand_cam.unwrap_or(self.show_hand_cam),
            show_room_cam: patch.show_room_cam.unwrap_or(self.show_room_cam),
        }
    }
}
