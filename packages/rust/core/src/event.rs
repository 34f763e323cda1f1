//! Browser tab lifecycle events, as fed to the pipeline.

use serde::{Deserialize, Serialize};

use tabdrome_shared::{RawTab, TabId, WindowId};

/// One browser notification. Serialized with a `type` tag, one per line in
/// recorded event logs:
///
/// ```json
/// {"type":"activated","tabId":4,"windowId":1}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BrowserEvent {
    Created { tab: RawTab },
    Updated { tab: RawTab },
    Activated { tab_id: TabId, window_id: WindowId },
    Moved { tab_id: TabId, from_index: u32, to_index: u32 },
    Removed { tab_id: TabId },
    WindowRemoved { window_id: WindowId },
}

impl BrowserEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Activated { .. } => "activated",
            Self::Moved { .. } => "moved",
            Self::Removed { .. } => "removed",
            Self::WindowRemoved { .. } => "window_removed",
        }
    }
}
