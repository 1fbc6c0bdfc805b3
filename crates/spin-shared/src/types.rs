use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches the `/me` or `.me` token that echo messages replace with the
/// sender's name.
static ME_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/.]me").expect("valid me-token pattern"));

/// Canonical form of a user or room name, used for every set lookup.
pub fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Moderation and away bits of one room member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MemberFlags(u8);

impl MemberFlags {
    pub const NONE: Self = Self(0);
    pub const VOICE: Self = Self(1 << 0);
    pub const HALF_OP: Self = Self(1 << 1);
    pub const OP: Self = Self(1 << 2);
    pub const AWAY: Self = Self(1 << 3);

    /// Parse the decimal rights field sent by the server.
    ///
    /// Bit `0x10` is operator, `0x04` half-operator, `0x01` voice. Anything
    /// that isn't a decimal integer yields no flags.
    pub fn from_wire(raw: &[u8]) -> Self {
        let value = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok().or_else(|| s.is_empty().then_some(0)));
        let Some(value) = value else {
            return Self::NONE;
        };

        let mut flags = Self::NONE;
        if value & 0x10 != 0 {
            flags.insert(Self::OP);
        }
        if value & 0x04 != 0 {
            flags.insert(Self::HALF_OP);
        }
        if value & 0x01 != 0 {
            flags.insert(Self::VOICE);
        }
        flags
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_moderator(self) -> bool {
        self.intersects(Self::OP | Self::HALF_OP)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for MemberFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Presence of a peer as last reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    Available,
    Away(String),
    Offline,
}

impl Presence {
    pub fn is_online(&self) -> bool {
        !matches!(self, Presence::Offline)
    }
}

/// The local user's own status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    Available,
    Away(String),
}

impl UserStatus {
    pub fn is_away(&self) -> bool {
        matches!(self, UserStatus::Away(_))
    }
}

/// Whether away auto-replies from peers are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AwayReplyPolicy {
    #[default]
    Always,
    Never,
    NonBuddies,
}

impl FromStr for AwayReplyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "non-buddies" | "non-buddys" => Ok(Self::NonBuddies),
            other => Err(format!("unknown away reply policy: {other}")),
        }
    }
}

/// Rendering class of a chat line, taken from its type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Plain,
    Emote,
    Echo,
}

impl MessageKind {
    pub fn from_wire(ty: u8) -> Self {
        match ty {
            b'c' | b'd' => Self::Emote,
            b'e' | b'f' => Self::Echo,
            _ => Self::Plain,
        }
    }

    /// Render `text` sent by `sender` the way chat clients show it.
    pub fn render(self, sender: &str, text: &str) -> String {
        match self {
            Self::Plain => text.to_owned(),
            Self::Emote => format!("/me {text}"),
            Self::Echo => {
                let replaced = ME_TOKEN.replace_all(text, regex::NoExpand(sender));
                format!("/me {replaced} [echo]")
            }
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plain => "plain",
            Self::Emote => "emote",
            Self::Echo => "echo",
        };
        f.write_str(s)
    }
}

/// Strip a leading `/me ` from outgoing text.
///
/// Returns the remaining text and whether it was an emote.
pub fn meify(text: &str) -> (&str, bool) {
    match text.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("/me ") => (&text[4..], true),
        _ => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_flags_from_wire() {
        assert_eq!(MemberFlags::from_wire(b"16"), MemberFlags::OP);
        assert_eq!(MemberFlags::from_wire(b"4"), MemberFlags::HALF_OP);
        assert_eq!(
            MemberFlags::from_wire(b"21"),
            MemberFlags::OP | MemberFlags::HALF_OP | MemberFlags::VOICE
        );
        // 0x02 is "registered", not a moderation bit.
        assert_eq!(MemberFlags::from_wire(b"2"), MemberFlags::NONE);
        assert_eq!(MemberFlags::from_wire(b"x1"), MemberFlags::NONE);
        assert_eq!(MemberFlags::from_wire(b""), MemberFlags::NONE);
    }

    #[test]
    fn test_member_flags_toggle() {
        let mut flags = MemberFlags::VOICE;
        flags.insert(MemberFlags::HALF_OP);
        assert!(flags.is_moderator());
        flags.remove(MemberFlags::HALF_OP);
        assert!(!flags.is_moderator());
        assert!(flags.contains(MemberFlags::VOICE));
    }

    #[test]
    fn test_render_kinds() {
        assert_eq!(MessageKind::from_wire(b'a').render("bob", "hi"), "hi");
        assert_eq!(MessageKind::from_wire(b'c').render("bob", "waves"), "/me waves");
        assert_eq!(
            MessageKind::from_wire(b'e').render("bob", "/me waves"),
            "/me bob waves [echo]"
        );
    }

    #[test]
    fn test_meify() {
        assert_eq!(meify("/me waves"), ("waves", true));
        assert_eq!(meify("/ME waves"), ("waves", true));
        assert_eq!(meify("hello"), ("hello", false));
        assert_eq!(meify("/me"), ("/me", false));
    }

    #[test]
    fn test_away_policy_parse() {
        assert_eq!("never".parse::<AwayReplyPolicy>(), Ok(AwayReplyPolicy::Never));
        assert_eq!(
            "non-buddys".parse::<AwayReplyPolicy>(),
            Ok(AwayReplyPolicy::NonBuddies)
        );
        assert!("sometimes".parse::<AwayReplyPolicy>().is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("BoB"), "bob");
        assert_eq!(normalize("Größe"), "größe");
    }
}
