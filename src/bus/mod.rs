//! Local broadcast bus between sibling helpers.
//!
//! A star: the elected leader listens on a Unix socket and every follower
//! holds one connection to it. Delivery is best-effort and ordered per
//! sender; there are no acks and nothing is retried.

pub mod message;
pub mod socket;

use std::path::PathBuf;

use tokio::sync::broadcast;

use message::BusMessage;

/// Capacity of the in-process fan-out; a lagging subscriber loses the
/// oldest messages.
pub const LOCAL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("connect {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Publish/subscribe seam between the hotkey side and the bus transport.
pub trait BroadcastBus: Send + Sync {
    /// Hand `message` to every helper, this one included. Never blocks.
    fn publish(&self, message: BusMessage);

    /// Messages from any helper, in arrival order.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}
