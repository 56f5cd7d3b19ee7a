//! Messages carried on the local bus between helpers.
//!
//! Encoded as MessagePack maps (`to_vec_named`) so the `type` tag and
//! field names survive; frames are delimited by the transport.

use serde::{Deserialize, Serialize};

use crate::resolver::identity::ProfileIdentity;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    #[serde(rename = "cycle_next")]
    Next,
    #[serde(rename = "cycle_prev")]
    Prev,
}

impl CycleDirection {
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse { Self::Prev } else { Self::Next }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BusMessage {
    /// One hotkey repeat.
    #[serde(rename = "ctrlTab")]
    CtrlTab {
        direction: CycleDirection,
        #[serde(rename = "showUI")]
        show_ui: bool,
        #[serde(rename = "combineWindows")]
        combine_windows: bool,
        #[serde(rename = "targetBrowser")]
        target_browser: ProfileIdentity,
    },
    /// Modifier released: commit the selection.
    #[serde(rename = "ctrlRelease")]
    CtrlRelease {
        #[serde(rename = "targetBrowser")]
        target_browser: ProfileIdentity,
    },
    /// Reveal debounce elapsed while the session is still held.
    #[serde(rename = "requestShowUI")]
    RequestShowUi {
        #[serde(rename = "combineWindows")]
        combine_windows: bool,
        #[serde(rename = "targetBrowser")]
        target_browser: ProfileIdentity,
    },
    #[serde(rename = "copyUrl")]
    CopyUrl {
        #[serde(rename = "targetBrowser")]
        target_browser: ProfileIdentity,
    },
    #[serde(rename = "shortcutsChanged")]
    ShortcutsChanged {},
    #[serde(rename = "leaderResigned")]
    LeaderResigned {},
}

impl BusMessage {
    /// The profile an addressed message is meant for; `None` for
    /// broadcasts every helper handles.
    pub fn target(&self) -> Option<&ProfileIdentity> {
        match self {
            Self::CtrlTab { target_browser, .. }
            | Self::CtrlRelease { target_browser }
            | Self::RequestShowUi { target_browser, .. }
            | Self::CopyUrl { target_browser } => Some(target_browser),
            Self::ShortcutsChanged {} | Self::LeaderResigned {} => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CtrlTab { .. } => "ctrlTab",
            Self::CtrlRelease { .. } => "ctrlRelease",
            Self::RequestShowUi { .. } => "requestShowUI",
            Self::CopyUrl { .. } => "copyUrl",
            Self::ShortcutsChanged {} => "shortcutsChanged",
            Self::LeaderResigned {} => "leaderResigned",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressed_messages_expose_their_target() {
        let chrome = ProfileIdentity::new("com.google.Chrome", 42);
        let msg = BusMessage::CtrlTab {
            direction: CycleDirection::Prev,
            show_ui: true,
            combine_windows: false,
            target_browser: chrome.clone(),
        };
        assert_eq!(msg.target(), Some(&chrome));
        assert_eq!(BusMessage::LeaderResigned {}.target(), None);
    }

    #[test]
    fn msgpack_frames_decode_to_the_same_message() {
        let msg = BusMessage::RequestShowUi {
            combine_windows: true,
            target_browser: ProfileIdentity::bundle_only("com.brave.Browser"),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(BusMessage::decode(&bytes).unwrap(), msg);

        let bytes = BusMessage::ShortcutsChanged {}.encode().unwrap();
        assert_eq!(BusMessage::decode(&bytes).unwrap(), BusMessage::ShortcutsChanged {});
    }

    #[test]
    fn json_shape_uses_wire_names() {
        let msg = BusMessage::CtrlTab {
            direction: CycleDirection::Next,
            show_ui: false,
            combine_windows: true,
            target_browser: ProfileIdentity::new("com.google.Chrome", 7),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ctrlTab");
        assert_eq!(value["direction"], "cycle_next");
        assert_eq!(value["showUI"], false);
        assert_eq!(value["combineWindows"], true);
        assert_eq!(value["targetBrowser"]["bundleId"], "com.google.Chrome");
        assert_eq!(value["targetBrowser"]["processId"], 7);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(BusMessage::decode(&[0xc1, 0x00]).is_err());
    }
}
