use chrono::{DateTime, Utc};
use serde::Serialize;

use spin_shared::{MemberFlags, Presence};

/// Notifications sent *from* the session to the application.
///
/// Every event is also applied to the session's [`Directory`] before it is
/// handed out, so the directory always reflects the events seen so far.
///
/// [`Directory`]: crate::directory::Directory
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// All bring-up steps completed.
    Ready,
    /// The chat server closed the session after it was established.
    Disconnected,
    /// The session ended with a fatal error.
    ConnectionLost { reason: String },
    /// Informational message for the user.
    Notice { title: String, text: String },

    PrivateMessage {
        from: String,
        text: String,
        auto_reply: bool,
        at: DateTime<Utc>,
    },
    SpamWarning { from: String, text: String },
    GameInvite {
        from: String,
        title: String,
        id: String,
        token: String,
        password: String,
    },
    /// The server could not deliver a private message.
    MessageFailed { user: String },

    BuddyAdded { id: String, name: String },
    BuddyRenamed { id: String, old: String, new: String },
    BuddyRemoved { id: String, name: String },
    /// Buddy picture changed. `data` is `None` when the picture was removed.
    BuddyIcon {
        name: String,
        url: Option<String>,
        #[serde(skip)]
        data: Option<Vec<u8>>,
    },
    BuddyPresence { name: String, presence: Presence },

    NewMail {
        subject: String,
        from: String,
        url: String,
    },
    /// Arrival stamp of the newest mail seen; persist it to avoid repeats.
    MailCheckpoint { last_arrival: String },

    ChatJoined { id: u32, room: String },
    JoinFailed { room: String, reason: String },
    ChatLeft { room: String, message: String },
    ChatUserJoined {
        room: String,
        user: String,
        flags: MemberFlags,
    },
    ChatUserLeft {
        room: String,
        user: String,
        reason: Option<String>,
    },
    ChatRoster {
        room: String,
        members: Vec<(String, MemberFlags)>,
    },
    ChatRosterCleared { room: String },
    ChatFlags {
        room: String,
        user: String,
        flags: MemberFlags,
    },
    ChatMessage {
        room: String,
        from: String,
        text: String,
        mentions_me: bool,
        at: DateTime<Utc>,
    },
    /// Server or moderation notice shown inside a room.
    ChatSystem {
        room: String,
        text: String,
        highlight: bool,
    },
    ChatTopic { room: String, topic: String },

    RoomListed { name: String },
    RoomListFinished,

    /// A command from the application was refused before reaching the wire.
    CommandRejected { reason: String },
}
