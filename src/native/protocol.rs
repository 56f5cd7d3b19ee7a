//! Messages exchanged with the browser extension.
//!
//! Every message is a JSON object whose `action` field selects the
//! variant. Field names follow what the extension already sends: the
//! cycle requests use snake_case (`show_ui`), everything else camelCase.

use serde::{Deserialize, Serialize};

use crate::bus::message::CycleDirection;

/// Browser-assigned tab identifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One card in the switcher overlay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TabCard {
    pub id: TabId,
    pub title: String,
    #[serde(rename = "favIconUrl", default)]
    pub fav_icon_url: String,
    /// `data:` URL of a JPEG capture, when the extension has one.
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub url: String,
}

/// Human-readable shortcut labels reported back on registration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShortcutLabels {
    #[serde(rename = "tabSwitch")]
    pub tab_switch: String,
    #[serde(rename = "copyUrl")]
    pub copy_url: String,
}

/// Helper → extension.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostMessage {
    Ready,
    Registered {
        #[serde(rename = "bundleId")]
        bundle_id: String,
        shortcuts: ShortcutLabels,
    },
    CycleNext {
        show_ui: bool,
        current_window_only: bool,
    },
    CyclePrev {
        show_ui: bool,
        current_window_only: bool,
    },
    RequestShowUi {
        current_window_only: bool,
    },
    EndSwitch,
    Ping,
    Pong,
    CopyUrl,
    ErrorNoAccessibility,
}

impl HostMessage {
    pub fn cycle(direction: CycleDirection, show_ui: bool, current_window_only: bool) -> Self {
        match direction {
            CycleDirection::Next => Self::CycleNext {
                show_ui,
                current_window_only,
            },
            CycleDirection::Prev => Self::CyclePrev {
                show_ui,
                current_window_only,
            },
        }
    }

    /// Wire name of the variant, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Registered { .. } => "registered",
            Self::CycleNext { .. } => "cycle_next",
            Self::CyclePrev { .. } => "cycle_prev",
            Self::RequestShowUi { .. } => "request_show_ui",
            Self::EndSwitch => "end_switch",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::CopyUrl => "copy_url",
            Self::ErrorNoAccessibility => "error_no_accessibility",
        }
    }
}

/// Extension → helper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExtensionMessage {
    Register {
        #[serde(rename = "bundleId")]
        bundle_id: String,
        #[serde(
            rename = "extensionVersion",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        extension_version: Option<String>,
    },
    ShowSwitcher {
        tabs: Vec<TabCard>,
        #[serde(rename = "selectedIndex")]
        selected_index: usize,
    },
    UpdateSelection {
        #[serde(rename = "selectedIndex")]
        selected_index: usize,
    },
    HideSwitcher,
    Ping,
    Pong,
    UrlCopied {
        url: String,
    },
}

impl ExtensionMessage {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::ShowSwitcher { .. } => "show_switcher",
            Self::UpdateSelection { .. } => "update_selection",
            Self::HideSwitcher => "hide_switcher",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::UrlCopied { .. } => "url_copied",
        }
    }
}
