//! Line protocol: one frame per `\n`-terminated line, an opcode byte followed
//! by `#`-separated fields.

/// Separator between the fields of one frame.
pub const FIELD_SEPARATOR: u8 = b'#';

/// Terminator of one frame.
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Opcodes received from the chat server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundOp {
    Connected,
    Disconnected,
    PrivateMessage,
    Presence,
    Notify,
    Pong,
    RoomList,
    JoinLeave,
    ChatMessage,
    Roster,
    MessageError,
    JoinError,
    RoomInfo,
    MemberMode,
    RoomMode,
}

impl InboundOp {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'a' => Some(Self::Connected),
            b'e' => Some(Self::Disconnected),
            b'h' => Some(Self::PrivateMessage),
            b'=' => Some(Self::Presence),
            b'>' => Some(Self::Notify),
            b'J' => Some(Self::Pong),
            b'l' => Some(Self::RoomList),
            b'+' => Some(Self::JoinLeave),
            b'g' => Some(Self::ChatMessage),
            b'j' => Some(Self::Roster),
            b'x' => Some(Self::MessageError),
            b'v' => Some(Self::JoinError),
            b'o' => Some(Self::RoomInfo),
            b'|' => Some(Self::MemberMode),
            b'n' => Some(Self::RoomMode),
            _ => None,
        }
    }
}

/// Opcodes sent to the chat server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutboundOp {
    ClientId = b'A',
    ClientInfo = b'B',
    Login = b'a',
    Disconnect = b'e',
    PrivateMessage = b'h',
    SetStatus = b'W',
    RoomMessage = b'g',
    Join = b'c',
    Leave = b'd',
    Roster = b'j',
    RoomInfo = b'o',
    RoomList = b'l',
    Ignore = b'w',
    Unignore = b'O',
    Ping = b'J',
    Kick = b'f',
    RoomBan = b't',
    MemberMode = b'|',
    ServerKick = b'1',
    ServerBan = b'2',
    ServerMute = b'E',
}

impl OutboundOp {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// One outbound command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    op: OutboundOp,
    fields: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(op: OutboundOp) -> Self {
        Self {
            op,
            fields: Vec::new(),
        }
    }

    /// Append one field.
    pub fn arg(mut self, field: impl AsRef<[u8]>) -> Self {
        self.fields.push(field.as_ref().to_vec());
        self
    }

    pub fn op(&self) -> OutboundOp {
        self.op
    }

    /// Serialize to exactly one wire line.
    ///
    /// Newlines inside fields become spaces so the command never spans two
    /// frames.
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self.fields.iter().map(|f| f.len() + 1).sum();
        let mut out = Vec::with_capacity(body + 2);
        out.push(self.op.byte());
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(FIELD_SEPARATOR);
            }
            out.extend_from_slice(field);
        }
        for b in out.iter_mut() {
            if *b == FRAME_TERMINATOR {
                *b = b' ';
            }
        }
        out.push(FRAME_TERMINATOR);
        out
    }
}

/// Split the body of a frame into at most `N` fields.
///
/// The last field receives the unsplit remainder (it may contain `#`).
/// Fields beyond the end of the input are `None`.
pub fn split_fields<const N: usize>(rest: &[u8]) -> [Option<&[u8]>; N] {
    let mut out = [None; N];
    let mut remaining = Some(rest);

    for (i, slot) in out.iter_mut().enumerate() {
        let Some(cur) = remaining else { break };
        if i + 1 == N {
            *slot = Some(cur);
            break;
        }
        match cur.iter().position(|&b| b == FIELD_SEPARATOR) {
            Some(pos) => {
                *slot = Some(&cur[..pos]);
                remaining = Some(&cur[pos + 1..]);
            }
            None => {
                *slot = Some(cur);
                remaining = None;
            }
        }
    }

    out
}

/// Split a list on `sep` into every element.
pub fn split_list(rest: &[u8], sep: u8) -> impl Iterator<Item = &[u8]> {
    rest.split(move |&b| b == sep)
}

// ---------------------------------------------------------------------------
// Leave reasons
// ---------------------------------------------------------------------------

/// Reason templates indexed by `status letter - 'A'`.
///
/// Only `B` through `M` carry a reason; `A` is an ordinary leave.
const LEAVE_REASONS: [&str; 13] = [
    "left the room",
    "kicked by {secondary}",
    "kicked by the server",
    "you are banned",
    "room {room} is currently full",
    "room {room} is closed",
    "creation of new rooms is not allowed",
    "room is for registered users only",
    "room is for VIP users only",
    "room could not be created: too many rooms",
    "room could not be created: room name is illegal",
    "too long inactive",
    "kicked of the server",
];

/// Parameters a leave reason may refer to.
#[derive(Debug, Clone, Copy)]
pub struct LeaveContext<'a> {
    pub actor: &'a str,
    pub room: &'a str,
    pub secondary: &'a str,
    pub ip: &'a str,
}

impl LeaveContext<'_> {
    /// Human readable reason for an uppercase leave status letter.
    pub fn reason(&self, status: u8) -> Option<String> {
        if !(b'B'..=b'M').contains(&status) {
            return None;
        }
        let template = LEAVE_REASONS[usize::from(status - b'A')];
        Some(
            template
                .replace("{actor}", self.actor)
                .replace("{room}", self.room)
                .replace("{secondary}", self.secondary)
                .replace("{ip}", self.ip),
        )
    }
}
