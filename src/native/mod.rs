//! Native messaging: the stdio pipe between a helper and its extension.

pub mod channel;
pub mod codec;
pub mod protocol;

/// Failure to put a message on the pipe.
///
/// Send failures are logged by the caller and never end the helper; only
/// end-of-stream on the read side does that.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("serialize: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of {0} bytes exceeds the frame ceiling")]
    Oversized(usize),
    #[error("write: {0}")]
    Io(#[from] std::io::Error),
}
