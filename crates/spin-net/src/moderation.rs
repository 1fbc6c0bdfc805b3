//! Room and server moderation commands.

use std::sync::LazyLock;

use regex::Regex;

use spin_shared::{Command, OutboundOp};

use crate::error::ValidationError;
use crate::session::Session;

/// Accepted IP ban masks: three octets plus a fourth octet or `*`.
static BAN_MASK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(?:\.(?:\d+|\*))$").expect("valid ban mask pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Moderation {
    Kick { room: String, user: String },
    BanIp { room: String, ip: String },
    Unban { room: String, user: String },
    KickBan { room: String, user: String },
    BanList { room: String },
    LockUnregistered { room: String },
    Op { room: String, user: String },
    Deop { room: String, user: String },
    Unmute { room: String, user: String },
    Mute { room: String, user: String },
    Warn { room: String, user: String, reason: String },
    ServerKick { user: String },
    ServerKickBan { user: String },
    ServerMute { user: String },
}

impl Session {
    /// Validate and send a moderation command.
    pub fn moderate(&mut self, action: Moderation) -> Result<(), ValidationError> {
        self.ensure_open()?;

        match action {
            Moderation::Kick { room, user } => {
                let (room, user) = (self.encode_room(&room)?, self.encode_name(&user)?);
                self.write(Command::new(OutboundOp::Kick).arg(user).arg(room));
            }
            Moderation::BanIp { room, ip } => {
                let ip = ip.trim();
                if !BAN_MASK.is_match(ip) {
                    return Err(ValidationError::InvalidBanMask(ip.to_owned()));
                }
                let room = self.encode_room(&room)?;
                self.write(
                    Command::new(OutboundOp::RoomBan)
                        .arg(room)
                        .arg("e")
                        .arg("0")
                        .arg(ip),
                );
            }
            Moderation::Unban { room, user } => {
                let (room, user) = (self.encode_room(&room)?, self.encode_name(&user)?);
                self.write(Command::new(OutboundOp::RoomBan).arg(room).arg("E").arg(user));
            }
            Moderation::KickBan { room, user } => {
                let (room, user) = (self.encode_room(&room)?, self.encode_name(&user)?);
                self.write(
                    Command::new(OutboundOp::RoomBan)
                        .arg(&room)
                        .arg("e")
                        .arg("a")
                        .arg(&user),
                );
                self.write(Command::new(OutboundOp::Kick).arg(user).arg(room));
            }
            Moderation::BanList { room } => {
                let room = self.encode_room(&room)?;
                self.write(Command::new(OutboundOp::RoomBan).arg(room).arg("1").arg(""));
            }
            Moderation::LockUnregistered { room } => {
                let room = self.encode_room(&room)?;
                self.write(Command::new(OutboundOp::RoomBan).arg(room).arg("i").arg(""));
            }
            Moderation::Op { room, user } => self.member_mode(&room, "a", &user)?,
            Moderation::Deop { room, user } => self.member_mode(&room, "A", &user)?,
            Moderation::Unmute { room, user } => self.member_mode(&room, "b", &user)?,
            Moderation::Mute { room, user } => self.member_mode(&room, "B", &user)?,
            Moderation::Warn { room, user, reason } => {
                let (room, user) = (self.encode_room(&room)?, self.encode_name(&user)?);
                let reason = self.codec.encode_text(&reason);
                self.write(
                    Command::new(OutboundOp::RoomMessage)
                        .arg(room)
                        .arg("0")
                        .arg("warn")
                        .arg(user)
                        .arg(reason),
                );
            }
            Moderation::ServerKick { user } => {
                let user = self.encode_name(&user)?;
                self.write(Command::new(OutboundOp::ServerKick).arg(user));
            }
            Moderation::ServerKickBan { user } => {
                let user = self.encode_name(&user)?;
                self.write(Command::new(OutboundOp::ServerBan).arg("c").arg(&user));
                self.write(Command::new(OutboundOp::ServerBan).arg("a").arg(&user));
                self.write(Command::new(OutboundOp::ServerKick).arg(user));
            }
            Moderation::ServerMute { user } => {
                let user = self.encode_name(&user)?;
                self.write(Command::new(OutboundOp::ServerMute).arg(user));
            }
        }
        Ok(())
    }

    fn member_mode(&mut self, room: &str, mode: &str, user: &str) -> Result<(), ValidationError> {
        let (room, user) = (self.encode_room(room)?, self.encode_name(user)?);
        self.write(
            Command::new(OutboundOp::MemberMode)
                .arg(room)
                .arg(mode)
                .arg(user)
                .arg(""),
        );
        Ok(())
    }
}
