//! Room handlers: directory listing, joins and leaves, room messages,
//! rosters, topics and moderation notices.

use chrono::Utc;
use tracing::debug;

use spin_shared::{
    normalize, split_fields, split_list, Command, FrameError, LeaveContext, MemberFlags,
    MessageKind, OutboundOp,
};

use crate::error::DispatchError;
use crate::events::SessionEvent;
use crate::session::Session;

type HandlerResult = std::result::Result<(), DispatchError>;

const NO_KNOWN_REASON: &str = "no known reason";

fn first_byte(field: &'static str, raw: Option<&[u8]>) -> Result<u8, FrameError> {
    raw.and_then(|t| t.first().copied())
        .ok_or(FrameError::MissingField(field))
}

impl Session {
    /// `name#name#...`: one page of the room directory, which completes it.
    pub(crate) fn handle_room_list(&mut self, rest: &[u8]) -> HandlerResult {
        if !self.room_listing {
            debug!("Room list received without request");
            return Ok(());
        }

        for raw in split_list(rest, b'#').filter(|r| !r.is_empty()) {
            match self.decode_name("room", Some(raw)) {
                Ok(name) => self.emit(SessionEvent::RoomListed { name }),
                Err(e) => debug!(error = %e, "Skipping room list entry"),
            }
        }
        self.room_listing = false;
        self.emit(SessionEvent::RoomListFinished);
        Ok(())
    }

    /// `room#status#user#actor#rights#other#ip#extra`. A lowercase status
    /// letter is a join, uppercase a leave.
    pub(crate) fn handle_join_leave(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_room, st, raw_u1, raw_u2, rights, _other, ip, _extra] = split_fields::<8>(rest);
        let room = self.decode_name("room", raw_room)?;
        let raw_room = raw_room.unwrap_or_default();
        let st = first_byte("status", st)?;
        let u1 = self.decode_name("user", raw_u1)?;
        let u2 = self.decode_name("actor", raw_u2)?;
        let normalized_room = normalize(&room);

        if st.is_ascii_lowercase() {
            if self.is_self(&u1) {
                self.pending_joins.remove(&normalized_room);
                let id = self.next_chat_id;
                self.next_chat_id += 1;
                self.emit(SessionEvent::ChatJoined {
                    id,
                    room: normalized_room,
                });
                self.write(Command::new(OutboundOp::Roster).arg(raw_room));
                self.write(Command::new(OutboundOp::RoomInfo).arg(raw_room));
                self.send_room_away(&room);
            } else if self.directory.has_chat(&room) {
                self.emit(SessionEvent::ChatUserJoined {
                    room,
                    user: u1,
                    flags: MemberFlags::from_wire(rights.unwrap_or_default()),
                });
            } else {
                self.room_not_found(&room, raw_room);
            }
            return Ok(());
        }

        let ip = String::from_utf8_lossy(ip.unwrap_or_default());
        let reason = LeaveContext {
            actor: &u1,
            room: &room,
            secondary: &u2,
            ip: &ip,
        }
        .reason(st);

        if self.pending_joins.remove(&normalized_room) {
            self.emit(SessionEvent::JoinFailed {
                room: normalized_room,
                reason: reason.unwrap_or_else(|| NO_KNOWN_REASON.to_string()),
            });
            return Ok(());
        }

        let known = self.directory.has_chat(&room);
        if self.is_self(&u1) {
            if known {
                let message = match &reason {
                    Some(reason) => format!("You have left the room ({reason})"),
                    None => "You have left the room".to_string(),
                };
                self.emit(SessionEvent::ChatLeft { room, message });
            }
        } else if known {
            self.emit(SessionEvent::ChatUserLeft {
                room,
                user: u1,
                reason,
            });
        } else {
            self.room_not_found(&room, raw_room);
        }
        Ok(())
    }

    /// `room#user#rights#type#text`.
    pub(crate) fn handle_chat_message(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_room, raw_user, rights, ty, raw_text] = split_fields::<5>(rest);
        let room = self.decode_name("room", raw_room)?;
        let raw_room = raw_room.unwrap_or_default();
        let user = self.decode_name("user", raw_user)?;
        let text = self.decode_text("text", raw_text)?;
        let ty = first_byte("type", ty)?;

        if ty == b'0' {
            return self.handle_chat_control(&room, raw_room, &user, rights, &text);
        }

        if !self.directory.has_chat(&room) {
            self.room_not_found(&room, raw_room);
            return Ok(());
        }

        let mentions_me = self
            .nick_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(&text));
        let text = MessageKind::from_wire(ty).render(&user, &text);
        self.emit(SessionEvent::ChatMessage {
            room,
            from: user,
            text,
            mentions_me,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Type `0` room messages: `warn#who#message` or `away#0|1`.
    fn handle_chat_control(
        &mut self,
        room: &str,
        raw_room: &[u8],
        user: &str,
        rights: Option<&[u8]>,
        body: &str,
    ) -> HandlerResult {
        if !self.directory.has_chat(room) {
            self.room_not_found(room, raw_room);
            return Ok(());
        }

        let (kind, args) = body.split_once('#').unwrap_or((body, ""));
        match kind.to_ascii_lowercase().as_str() {
            "warn" => {
                if !MemberFlags::from_wire(rights.unwrap_or_default()).is_moderator() {
                    debug!(room = %room, from = %user, "Warning from non-moderator ignored");
                    return Ok(());
                }
                let (who, message) = match args.split_once('#') {
                    Some((who, message)) => (who.trim(), message),
                    None => (args.trim(), ""),
                };
                let to_me = self.is_self(who);
                let text = match (to_me, message.is_empty()) {
                    (true, false) => format!("You have been warned by {user}: {message}"),
                    (true, true) => format!("You have been warned by {user}"),
                    (false, false) => format!("{who} has been warned by {user}: {message}"),
                    (false, true) => format!("{who} has been warned by {user}"),
                };
                self.emit(SessionEvent::ChatSystem {
                    room: room.to_owned(),
                    text,
                    highlight: to_me,
                });
            }
            "away" => {
                let status = args.split('#').next().unwrap_or_default();
                let away = status.trim().parse::<i64>().unwrap_or(0) != 0;
                let mut flags = self.directory.member_flags(room, user);
                if away {
                    flags.insert(MemberFlags::AWAY);
                } else {
                    flags.remove(MemberFlags::AWAY);
                }
                self.emit(SessionEvent::ChatFlags {
                    room: room.to_owned(),
                    user: user.to_owned(),
                    flags,
                });
            }
            other => debug!(kind = other, room = %room, "Ignoring room control message"),
        }
        Ok(())
    }

    /// `room#name:mode:state#...`.
    pub(crate) fn handle_roster(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_room, entries] = split_fields::<2>(rest);
        let room = self.decode_name("room", raw_room)?;
        if !self.directory.has_chat(&room) {
            self.room_not_found(&room, raw_room.unwrap_or_default());
            return Ok(());
        }

        let mut members = Vec::new();
        for entry in split_list(entries.unwrap_or_default(), b'#') {
            let mut parts = entry.splitn(3, |&b| b == b':');
            let (Some(name), Some(mode), Some(state)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(name) = self.decode_name("member", Some(name)) else {
                continue;
            };
            let mut flags = MemberFlags::from_wire(mode);
            if state.contains(&b'a') {
                flags.insert(MemberFlags::AWAY);
            }
            members.push((name, flags));
        }

        self.emit(SessionEvent::ChatRoster { room, members });
        Ok(())
    }

    /// Join rejected by the server.
    pub(crate) fn handle_join_error(&mut self, rest: &[u8]) -> HandlerResult {
        let room = normalize(&self.decode_name("room", Some(rest))?);
        if self.pending_joins.remove(&room) {
            self.emit(SessionEvent::JoinFailed {
                room,
                reason: NO_KNOWN_REASON.to_string(),
            });
        }
        Ok(())
    }

    /// `room#users#topic#homepage`.
    pub(crate) fn handle_room_info(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_room, _users, raw_topic, raw_hp] = split_fields::<4>(rest);
        let room = self.decode_name("room", raw_room)?;
        if !self.directory.has_chat(&room) {
            self.room_not_found(&room, raw_room.unwrap_or_default());
            return Ok(());
        }

        let topic = self.decode_text("topic", Some(raw_topic.unwrap_or_default()))?;
        let homepage = self.decode_text("homepage", Some(raw_hp.unwrap_or_default()))?;
        let topic = if homepage.is_empty() {
            topic
        } else {
            format!("{topic} ({homepage})")
        };
        self.emit(SessionEvent::ChatTopic { room, topic });
        Ok(())
    }

    /// `room#mode#user#actor#...`: operator and voice changes.
    pub(crate) fn handle_member_mode(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_room, ty, raw_user, raw_actor, _] = split_fields::<5>(rest);
        let ty = first_byte("mode", ty)?;
        let room = self.decode_name("room", raw_room)?;
        let user = self.decode_name("user", raw_user)?;
        let actor = self.decode_name("actor", raw_actor)?;
        if !self.directory.has_chat(&room) {
            self.room_not_found(&room, raw_room.unwrap_or_default());
            return Ok(());
        }

        let mut flags = self.directory.member_flags(&room, &user);
        let text = match ty {
            b'a' => {
                flags.insert(MemberFlags::HALF_OP);
                format!("{actor} gives operator rights to {user}")
            }
            b'A' => {
                flags.remove(MemberFlags::HALF_OP);
                format!("{actor} removes operator rights from {user}")
            }
            b'b' => {
                flags.insert(MemberFlags::VOICE);
                format!("{actor} gives voice to {user}")
            }
            b'B' => {
                flags.remove(MemberFlags::VOICE);
                format!("{actor} removes voice from {user}")
            }
            other => {
                debug!(mode = %char::from(other), room = %room, "Unknown member mode");
                return Ok(());
            }
        };

        self.emit(SessionEvent::ChatFlags {
            room: room.clone(),
            user,
            flags,
        });
        self.emit(SessionEvent::ChatSystem {
            room,
            text,
            highlight: false,
        });
        Ok(())
    }

    /// `room#mode#args`: ban list, IP bans and the unregistered lock.
    pub(crate) fn handle_room_mode(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_room, ty, args] = split_fields::<3>(rest);
        let ty = first_byte("mode", ty)?;
        let room = self.decode_name("room", raw_room)?;
        if !self.directory.has_chat(&room) {
            self.room_not_found(&room, raw_room.unwrap_or_default());
            return Ok(());
        }
        let args = args.unwrap_or_default();

        let text = match ty {
            b'1' => {
                // ip#timecode pairs
                let banned: Vec<String> = split_list(args, b'#')
                    .step_by(2)
                    .filter_map(|raw| self.decode_name("ip", Some(raw)).ok())
                    .filter(|ip| !ip.is_empty())
                    .collect();
                if banned.is_empty() {
                    "Banned IP addresses: none".to_string()
                } else {
                    format!("Banned IP addresses: {}", banned.join(", "))
                }
            }
            b'e' | b'E' => {
                let [raw_user, ip] = split_fields::<2>(args);
                let user = self.decode_name("user", raw_user)?;
                let ip = String::from_utf8_lossy(ip.unwrap_or_default());
                if ty == b'e' {
                    format!("IP address {ip} has been banned by {user}")
                } else {
                    format!("IP address {ip}'s ban has been removed by {user}")
                }
            }
            b'i' => "The room locked for unregistered users".to_string(),
            other => {
                debug!(mode = %char::from(other), room = %room, "Unknown room mode");
                return Ok(());
            }
        };

        self.emit(SessionEvent::ChatSystem {
            room,
            text,
            highlight: false,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::session;

    fn output(s: &Session) -> String {
        String::from_utf8_lossy(s.pending_output()).into_owned()
    }

    fn joined(room: &str) -> Session {
        let mut s = session();
        s.join_chat(room).unwrap();
        s.dispatch_frame(format!("+{room}#a#alice#alice#0").as_bytes())
            .unwrap();
        s.take_events();
        s
    }

    #[test]
    fn test_own_join_resolves_pending() {
        let mut s = session();
        s.join_chat("Lobby").unwrap();
        s.dispatch_frame(b"+Lobby#a#Alice#Alice#16").unwrap();

        assert!(!s.is_join_pending("lobby"));
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::ChatJoined {
                id: 1,
                room: "lobby".into()
            }]
        );
        assert_eq!(output(&s), "cLobby\njLobby\noLobby\ngLobby#0#away#0\n");
        assert!(s.directory().has_chat("lobby"));
    }

    #[test]
    fn test_leave_of_pending_room_fails_join_once() {
        let mut s = session();
        s.join_chat("lobby").unwrap();
        s.dispatch_frame(b"+lobby#E#alice#x#0").unwrap();
        s.dispatch_frame(b"+lobby#E#alice#x#0").unwrap();

        assert_eq!(
            s.take_events(),
            vec![SessionEvent::JoinFailed {
                room: "lobby".into(),
                reason: "room lobby is currently full".into()
            }]
        );
        assert!(!s.is_join_pending("lobby"));
    }

    #[test]
    fn test_join_error_resolves_pending() {
        let mut s = session();
        s.join_chat("Lobby").unwrap();
        s.dispatch_frame(b"vLOBBY").unwrap();
        s.dispatch_frame(b"vLOBBY").unwrap();
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::JoinFailed {
                room: "lobby".into(),
                reason: "no known reason".into()
            }]
        );
    }

    #[test]
    fn test_other_user_join_and_leave() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"+lobby#a#bob#bob#17").unwrap();
        assert_eq!(
            s.directory().member_flags("lobby", "bob"),
            MemberFlags::OP | MemberFlags::VOICE
        );

        s.dispatch_frame(b"+lobby#B#bob#mod#0").unwrap();
        assert_eq!(
            s.take_events().last(),
            Some(&SessionEvent::ChatUserLeft {
                room: "lobby".into(),
                user: "bob".into(),
                reason: Some("kicked by mod".into()),
            })
        );
    }

    #[test]
    fn test_own_leave() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"+lobby#L#alice#alice#0").unwrap();
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::ChatLeft {
                room: "lobby".into(),
                message: "You have left the room (too long inactive)".into()
            }]
        );
        assert!(!s.directory().has_chat("lobby"));
    }

    #[test]
    fn test_unknown_room_is_left() {
        let mut s = session();
        s.dispatch_frame(b"+ghost#a#bob#bob#0").unwrap();
        s.dispatch_frame(b"gghost#bob#0#a#hi").unwrap();
        assert_eq!(output(&s), "dghost\ndghost\n");
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn test_chat_message_and_mention() {
        let mut s = joined("lobby");
        s.nick_pattern = Some(regex::Regex::new(r"(?i)\balices?\b").unwrap());
        s.dispatch_frame(b"globby#bob#0#a#hi Alice").unwrap();
        s.dispatch_frame(b"globby#bob#0#a#malice").unwrap();
        s.dispatch_frame(b"globby#bob#0#e#/me hugs").unwrap();

        let msgs: Vec<(String, bool)> = s
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ChatMessage {
                    text, mentions_me, ..
                } => Some((text, mentions_me)),
                _ => None,
            })
            .collect();
        assert_eq!(
            msgs,
            vec![
                ("hi Alice".to_string(), true),
                ("malice".to_string(), false),
                ("/me bob hugs [echo]".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_warn_requires_moderator() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"globby#bob#0#0#warn#alice#calm down").unwrap();
        assert!(s.take_events().is_empty());

        s.dispatch_frame(b"globby#mod#16#0#warn#alice#calm down").unwrap();
        s.dispatch_frame(b"globby#mod#4#0#warn#carol").unwrap();
        assert_eq!(
            s.take_events(),
            vec![
                SessionEvent::ChatSystem {
                    room: "lobby".into(),
                    text: "You have been warned by mod: calm down".into(),
                    highlight: true,
                },
                SessionEvent::ChatSystem {
                    room: "lobby".into(),
                    text: "carol has been warned by mod".into(),
                    highlight: false,
                },
            ]
        );
    }

    #[test]
    fn test_away_flag_toggle() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"+lobby#a#bob#bob#1").unwrap();
        s.dispatch_frame(b"globby#bob#1#0#away#1").unwrap();
        assert_eq!(
            s.directory().member_flags("lobby", "bob"),
            MemberFlags::VOICE | MemberFlags::AWAY
        );
        s.dispatch_frame(b"globby#bob#1#0#away#0").unwrap();
        assert_eq!(s.directory().member_flags("lobby", "bob"), MemberFlags::VOICE);
    }

    #[test]
    fn test_roster() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"jlobby#bob:16:a#carol:0:#broken#dave:1").unwrap();
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::ChatRoster {
                room: "lobby".into(),
                members: vec![
                    ("bob".into(), MemberFlags::OP | MemberFlags::AWAY),
                    ("carol".into(), MemberFlags::NONE),
                ],
            }]
        );
    }

    #[test]
    fn test_room_info_topic() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"olobby#12#Welcome#http://x").unwrap();
        s.dispatch_frame(b"olobby#12#Plain").unwrap();
        let topics: Vec<String> = s
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ChatTopic { topic, .. } => Some(topic),
                _ => None,
            })
            .collect();
        assert_eq!(topics, vec!["Welcome (http://x)".to_string(), "Plain".to_string()]);
    }

    #[test]
    fn test_member_mode() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"+lobby#a#bob#bob#0").unwrap();
        s.take_events();

        s.dispatch_frame(b"|lobby#a#bob#mod#").unwrap();
        assert!(s.directory().member_flags("lobby", "bob").is_moderator());
        s.dispatch_frame(b"|lobby#b#bob#mod#").unwrap();
        s.dispatch_frame(b"|lobby#A#bob#mod#").unwrap();
        assert_eq!(s.directory().member_flags("lobby", "bob"), MemberFlags::VOICE);

        let texts: Vec<String> = s
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ChatSystem { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                "mod gives operator rights to bob".to_string(),
                "mod gives voice to bob".to_string(),
                "mod removes operator rights from bob".to_string(),
            ]
        );
    }

    #[test]
    fn test_room_mode() {
        let mut s = joined("lobby");
        s.dispatch_frame(b"nlobby#1#1.2.3.4#100#5.6.7.*#200").unwrap();
        s.dispatch_frame(b"nlobby#e#mod#1.2.3.4").unwrap();
        s.dispatch_frame(b"nlobby#E#mod#1.2.3.4").unwrap();
        s.dispatch_frame(b"nlobby#i#").unwrap();
        let texts: Vec<String> = s
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ChatSystem { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                "Banned IP addresses: 1.2.3.4, 5.6.7.*".to_string(),
                "IP address 1.2.3.4 has been banned by mod".to_string(),
                "IP address 1.2.3.4's ban has been removed by mod".to_string(),
                "The room locked for unregistered users".to_string(),
            ]
        );
    }

    #[test]
    fn test_room_list_only_when_requested() {
        let mut s = session();
        s.dispatch_frame(b"llobby#music").unwrap();
        assert!(s.take_events().is_empty());

        s.request_room_list().unwrap();
        s.dispatch_frame(b"llobby#music").unwrap();
        assert_eq!(
            s.take_events(),
            vec![
                SessionEvent::RoomListed {
                    name: "lobby".into()
                },
                SessionEvent::RoomListed {
                    name: "music".into()
                },
                SessionEvent::RoomListFinished,
            ]
        );
        assert!(!s.room_listing);
    }
}
