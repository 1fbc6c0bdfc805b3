//! Opcode dispatch for inbound frames.
//!
//! Session-wide opcodes are handled here; room opcodes live in
//! [`crate::rooms`]. Each handler gets the frame body after the opcode byte
//! and splits it into the fields it needs.

use chrono::Utc;
use tracing::{debug, info};

use spin_shared::{
    normalize, split_fields, AwayReplyPolicy, Command, FrameError, InboundOp, MessageKind,
    OutboundOp, Presence,
};

use crate::bringup::Milestone;
use crate::error::{DispatchError, Result, SessionError};
use crate::events::SessionEvent;
use crate::session::{Phase, Session};

type HandlerResult = std::result::Result<(), DispatchError>;

/// Default text of a spam warning without a message.
const NO_SPAM: &str = "no spam!";

impl Session {
    /// Interpret one complete frame.
    ///
    /// Frame-level problems are logged and the frame is dropped; only fatal
    /// errors are returned.
    pub fn dispatch_frame(&mut self, frame: &[u8]) -> Result<()> {
        let Some((&byte, rest)) = frame.split_first() else {
            debug!("Empty frame");
            return Ok(());
        };
        let Some(op) = InboundOp::from_byte(byte) else {
            debug!(
                opcode = %char::from(byte),
                line = %String::from_utf8_lossy(frame),
                "Unrecognized line"
            );
            return Ok(());
        };

        let result = match op {
            InboundOp::Connected => self.handle_connected(),
            InboundOp::Disconnected => self.handle_disconnected(),
            InboundOp::PrivateMessage => self.handle_private_message(rest),
            InboundOp::Presence => self.handle_presence(rest),
            InboundOp::Notify => self.handle_notify(rest),
            InboundOp::Pong => self.handle_pong(rest),
            InboundOp::RoomList => self.handle_room_list(rest),
            InboundOp::JoinLeave => self.handle_join_leave(rest),
            InboundOp::ChatMessage => self.handle_chat_message(rest),
            InboundOp::Roster => self.handle_roster(rest),
            InboundOp::MessageError => self.handle_message_error(rest),
            InboundOp::JoinError => self.handle_join_error(rest),
            InboundOp::RoomInfo => self.handle_room_info(rest),
            InboundOp::MemberMode => self.handle_member_mode(rest),
            InboundOp::RoomMode => self.handle_room_mode(rest),
        };

        match result {
            Ok(()) => Ok(()),
            Err(DispatchError::Frame(e)) => {
                debug!(?op, error = %e, "Dropped frame");
                Ok(())
            }
            Err(DispatchError::Fatal(e)) => Err(e),
        }
    }

    fn handle_connected(&mut self) -> HandlerResult {
        info!(user = %self.username, "Chat server accepted login");
        self.mark(Milestone::ChatLogin);

        self.send_status();
        for room in self.directory.chats() {
            self.send_room_away(&room);
        }

        self.refresh_friends();
        self.check_mail();
        self.load_prefs();
        Ok(())
    }

    fn handle_disconnected(&mut self) -> HandlerResult {
        if self.phase() == Phase::Connecting {
            return Err(SessionError::AuthenticationFailed("chat server denied login".into()).into());
        }
        info!(user = %self.username, "Disconnected by chat server");
        self.emit(SessionEvent::Disconnected);
        // The server already dropped us, so there is nobody to say goodbye to.
        if self.teardown().is_some() {
            debug!("Farewell skipped after server disconnect");
        }
        Ok(())
    }

    /// `user#echo#rights#type#text`. The rights field may be missing, in
    /// which case the frame has four fields.
    fn handle_private_message(&mut self, rest: &[u8]) -> HandlerResult {
        let [raw_user, echo, f3, f4, f5] = split_fields::<5>(rest);
        let (ty, raw_text) = match f5 {
            Some(text) => (f4, Some(text)),
            None => (f3, f4),
        };

        if echo.ok_or(FrameError::MissingField("echo"))? != b"0" {
            return Ok(());
        }
        let user = self.decode_name("user", raw_user)?;
        let ty = ty
            .and_then(|t| t.first().copied())
            .ok_or(FrameError::MissingField("type"))?;
        let text = self.decode_text("text", raw_text)?;

        if ty == b'0' {
            return self.handle_control_message(&user, &text);
        }

        let text = MessageKind::from_wire(ty).render(&user, &text);
        self.emit(SessionEvent::PrivateMessage {
            from: user,
            text,
            auto_reply: false,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Type `0` private messages: `kind#args`.
    fn handle_control_message(&mut self, user: &str, body: &str) -> HandlerResult {
        let (kind, args) = match body.split_once('#') {
            Some((kind, args)) => (kind, Some(args)),
            None => (body, None),
        };

        match kind.to_ascii_lowercase().as_str() {
            "away" => {
                if !self.directory.has_conversation(user) {
                    return Ok(());
                }
                let show = match self.config.away_policy {
                    AwayReplyPolicy::Always => true,
                    AwayReplyPolicy::Never => false,
                    AwayReplyPolicy::NonBuddies => self.directory.buddy(user).is_none(),
                };
                if show {
                    self.emit(SessionEvent::PrivateMessage {
                        from: user.to_owned(),
                        text: args.unwrap_or_default().to_owned(),
                        auto_reply: true,
                        at: Utc::now(),
                    });
                }
            }
            "ping" => {
                let raw_user = self
                    .codec
                    .encode_name(user)
                    .map_err(|source| FrameError::InvalidEncoding {
                        field: "user",
                        source,
                    })?;
                self.write(
                    Command::new(OutboundOp::PrivateMessage)
                        .arg(raw_user)
                        .arg("2")
                        .arg("0")
                        .arg("pong"),
                );
            }
            "nospam" => {
                let text = args.filter(|a| !a.is_empty()).unwrap_or(NO_SPAM);
                self.emit(SessionEvent::SpamWarning {
                    from: user.to_owned(),
                    text: text.to_owned(),
                });
            }
            "invite" if args.is_some_and(|a| a.starts_with("game#")) => {
                let mut parts = args.unwrap_or_default().splitn(5, '#').skip(1);
                let mut next = || parts.next().unwrap_or_default().to_owned();
                let (title, id, token, password) = (next(), next(), next(), next());
                self.emit(SessionEvent::GameInvite {
                    from: user.to_owned(),
                    title,
                    id,
                    token,
                    password,
                });
            }
            other => debug!(kind = other, from = %user, "Ignoring control message"),
        }
        Ok(())
    }

    fn handle_pong(&mut self, rest: &[u8]) -> HandlerResult {
        if rest == b"p" {
            self.on_pong();
        }
        Ok(())
    }

    /// `type#args`. Single updates (`g`, `h`, `i`, `j`) apply to known
    /// buddies only; the `e` list is ignored since friends come over HTTP.
    fn handle_presence(&mut self, rest: &[u8]) -> HandlerResult {
        let [ty, args] = split_fields::<2>(rest);
        let ty = ty
            .and_then(|t| t.first().copied())
            .ok_or(FrameError::MissingField("type"))?;
        if !matches!(ty, b'g' | b'h' | b'i' | b'j') {
            return Ok(());
        }

        let [raw_user, raw_reason] = split_fields::<2>(args.unwrap_or_default());
        let user = self.decode_name("user", raw_user)?;
        let reason = match raw_reason {
            Some(raw) => Some(self.decode_text("reason", Some(raw))?),
            None => None,
        };

        let Some(current) = self.directory.buddy(&user) else {
            return Ok(());
        };

        let presence = match ty {
            b'i' => Some(Presence::Away(reason.unwrap_or_default())),
            b'j' => Some(Presence::Available),
            // Online doesn't reset away.
            b'g' if !current.is_online() => Some(Presence::Available),
            b'h' => Some(Presence::Offline),
            _ => None,
        };
        if let Some(presence) = presence {
            self.emit(SessionEvent::BuddyPresence {
                name: user.clone(),
                presence,
            });
        }
        self.updated_status.insert(normalize(&user));
        Ok(())
    }

    /// `type#user#args`.
    fn handle_notify(&mut self, rest: &[u8]) -> HandlerResult {
        let [ty, raw_user, _args] = split_fields::<3>(rest);
        let ty = ty
            .and_then(|t| t.first().copied())
            .ok_or(FrameError::MissingField("type"))?;

        match ty {
            b'l' => self.refresh_friends(),
            b'a' => self.check_mail(),
            b'b' => {
                let user = self.decode_name("user", raw_user)?;
                self.emit(SessionEvent::Notice {
                    title: "New guestbook entry!".into(),
                    text: format!("{user} has added a new entry to your guestbook"),
                });
            }
            b'c' => {
                let user = self.decode_name("user", raw_user)?;
                self.emit(SessionEvent::Notice {
                    title: "New gift!".into(),
                    text: format!("{user} has given you something"),
                });
            }
            // Room and chat invitations.
            b'i' | b'j' => {}
            other => debug!(kind = %char::from(other), "Unknown notification"),
        }
        Ok(())
    }

    fn handle_message_error(&mut self, rest: &[u8]) -> HandlerResult {
        let user = self.decode_name("user", Some(rest))?;
        debug!(user = %user, "Message could not be delivered");
        self.emit(SessionEvent::MessageFailed { user });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::session;
    use crate::web::FetchKind;

    fn output(s: &Session) -> String {
        String::from_utf8_lossy(s.pending_output()).into_owned()
    }

    fn add_buddy(s: &mut Session, name: &str) {
        s.emit(SessionEvent::BuddyAdded {
            id: format!("id-{name}"),
            name: name.into(),
        });
        s.take_events();
    }

    #[test]
    fn test_connected_marks_and_fetches() {
        let mut s = session();
        s.dispatch_frame(b"a").unwrap();
        assert!(s.gate().is_marked(Milestone::ChatLogin));
        assert_eq!(output(&s), "W2#a#\n");

        let kinds: Vec<FetchKind> = s.take_fetches().into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![FetchKind::Friends, FetchKind::Mail, FetchKind::Prefs]);
    }

    #[test]
    fn test_disconnect_while_connecting_is_auth_failure() {
        let mut s = session();
        let err = s.dispatch_frame(b"e").unwrap_err();
        assert!(matches!(err, SessionError::AuthenticationFailed(ref m) if m == "chat server denied login"));
    }

    #[test]
    fn test_private_message_forms() {
        let mut s = session();
        s.dispatch_frame(b"hbob#0#a#hello").unwrap();
        s.dispatch_frame(b"hbob#0#2#c#waves#twice").unwrap();
        s.dispatch_frame(b"h bob #0#a#padded").unwrap();
        let texts: Vec<(String, String)> = s
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PrivateMessage { from, text, .. } => Some((from, text)),
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                ("bob".to_string(), "hello".to_string()),
                ("bob".to_string(), "/me waves#twice".to_string()),
                ("bob".to_string(), "padded".to_string()),
            ]
        );
    }

    #[test]
    fn test_private_message_echo_and_missing_fields_dropped() {
        let mut s = session();
        s.dispatch_frame(b"hbob#1#a#hello").unwrap();
        s.dispatch_frame(b"hbob").unwrap();
        s.dispatch_frame(b"hbob#0").unwrap();
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn test_ping_control_message_answers_pong() {
        let mut s = session();
        s.dispatch_frame(b"hbob#0#0#0#ping").unwrap();
        assert_eq!(output(&s), "hbob#2#0#pong\n");
    }

    #[test]
    fn test_away_reply_policy() {
        let mut s = session();
        // No open conversation: nothing shown.
        s.dispatch_frame(b"hbob#0#0#0#away#brb").unwrap();
        assert!(s.take_events().is_empty());

        s.send_im("bob", "hi").unwrap();
        s.dispatch_frame(b"hbob#0#0#0#away#brb").unwrap();
        assert!(matches!(
            s.take_events().as_slice(),
            [SessionEvent::PrivateMessage { auto_reply: true, text, .. }] if text == "brb"
        ));

        s.config.away_policy = AwayReplyPolicy::NonBuddies;
        add_buddy(&mut s, "bob");
        s.dispatch_frame(b"hbob#0#0#0#away#brb").unwrap();
        assert!(s.take_events().is_empty());

        s.config.away_policy = AwayReplyPolicy::Never;
        s.send_im("carol", "hi").unwrap();
        s.dispatch_frame(b"hcarol#0#0#0#away#brb").unwrap();
        assert!(s.take_events().is_empty());
    }

    #[test]
    fn test_spam_warning_and_game_invite() {
        let mut s = session();
        s.dispatch_frame(b"hbob#0#0#0#nospam").unwrap();
        s.dispatch_frame(b"hbob#0#0#0#invite#game#Chess#42#t1#pw").unwrap();
        let events = s.take_events();
        assert_eq!(
            events[0],
            SessionEvent::SpamWarning {
                from: "bob".into(),
                text: "no spam!".into()
            }
        );
        assert_eq!(
            events[1],
            SessionEvent::GameInvite {
                from: "bob".into(),
                title: "Chess".into(),
                id: "42".into(),
                token: "t1".into(),
                password: "pw".into(),
            }
        );
    }

    #[test]
    fn test_pong_disarms_watchdog() {
        let mut s = session();
        s.begin_chat_login().unwrap();
        s.on_keepalive(std::time::Instant::now());
        assert!(s.watchdog_deadline().is_some());
        s.dispatch_frame(b"Jx").unwrap();
        assert!(s.watchdog_deadline().is_some());
        s.dispatch_frame(b"Jp").unwrap();
        assert!(s.watchdog_deadline().is_none());
    }

    #[test]
    fn test_presence_updates_known_buddies_only() {
        let mut s = session();
        s.dispatch_frame(b"=i#bob#lunch").unwrap();
        assert!(s.take_events().is_empty());

        add_buddy(&mut s, "Bob");
        s.dispatch_frame(b"=i#bob#lunch").unwrap();
        assert_eq!(s.directory().buddy("bob"), Some(Presence::Away("lunch".into())));

        // Online doesn't clear away.
        s.dispatch_frame(b"=g#bob").unwrap();
        assert_eq!(s.directory().buddy("bob"), Some(Presence::Away("lunch".into())));

        s.dispatch_frame(b"=j#bob").unwrap();
        assert_eq!(s.directory().buddy("bob"), Some(Presence::Available));
        s.dispatch_frame(b"=h#bob").unwrap();
        assert_eq!(s.directory().buddy("bob"), Some(Presence::Offline));
        s.dispatch_frame(b"=g#bob").unwrap();
        assert_eq!(s.directory().buddy("bob"), Some(Presence::Available));

        assert!(s.updated_status.contains("bob"));
        s.dispatch_frame(b"=e#bob#carol").unwrap();
    }

    #[test]
    fn test_notify() {
        let mut s = session();
        s.dispatch_frame(b">l").unwrap();
        s.dispatch_frame(b">a").unwrap();
        let kinds: Vec<FetchKind> = s.take_fetches().into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![FetchKind::Friends, FetchKind::Mail]);

        s.dispatch_frame(b">b#bob").unwrap();
        s.dispatch_frame(b">c#carol").unwrap();
        let texts: Vec<String> = s
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Notice { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                "bob has added a new entry to your guestbook".to_string(),
                "carol has given you something".to_string(),
            ]
        );
    }

    #[test]
    fn test_message_error() {
        let mut s = session();
        s.dispatch_frame(b"xbob").unwrap();
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::MessageFailed { user: "bob".into() }]
        );
    }

    #[test]
    fn test_unknown_opcode_and_empty_frame_ignored() {
        let mut s = session();
        s.dispatch_frame(b"Zwhatever").unwrap();
        s.dispatch_frame(b"").unwrap();
        assert!(s.take_events().is_empty());
        assert!(s.pending_output().is_empty());
    }
}
