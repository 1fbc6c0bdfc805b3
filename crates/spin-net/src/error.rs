use spin_shared::{CodecError, FrameError};
use thiserror::Error;

/// The byte stream to the chat server broke.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("Write returned zero bytes with data pending")]
    WriteZero,

    #[error("ping timeout")]
    PingTimeout,
}

/// A request on the HTTP control channel failed.
#[derive(Error, Debug, Clone)]
pub enum WebError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Invalid JSON reply: {0}")]
    Json(String),

    #[error("Invalid URL: {0}")]
    Url(String),
}

/// An outbound command was rejected before anything was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Room name {0:?} must not contain '#'")]
    RoomContainsSeparator(String),

    #[error("Name {name:?} cannot be sent: {source}")]
    Unencodable {
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("Invalid IP ban mask: {0}")]
    InvalidBanMask(String),

    #[error("Not connected")]
    NotConnected,
}

/// Connection-level failure. The session is torn down after any of these.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Outcome of a handler that failed.
///
/// `Frame` errors are confined to the frame that produced them; `Fatal`
/// errors end the session.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Fatal(#[from] SessionError),
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        DispatchError::Fatal(SessionError::Transport(err))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
