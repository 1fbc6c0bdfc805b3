//! Web login and the friends, mail and prefs synchronisation.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use spin_shared::constants::{
    FRIENDS_PATH, FRIEND_ENTRY_LEN, LOGIN_OK_PREFIX, LOGIN_PATH, MAIL_ENTRY_MIN_LEN, MAIL_PATH,
    PREFS_PATH,
};
use spin_shared::{normalize, Presence};

use crate::bringup::Milestone;
use crate::directory::BuddyEntry;
use crate::error::{Result, SessionError, WebError};
use crate::events::SessionEvent;
use crate::session::Session;
use crate::web::{session_url, FetchKind, FetchReply, WebRequest};

/// String form of a JSON scalar.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().parse::<i64>().is_ok_and(|v| v != 0),
        _ => false,
    }
}

impl Session {
    fn web_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.web_base.trim_end_matches('/'))
    }

    fn login_url(&self) -> String {
        let url = self.web_url(LOGIN_PATH);
        match url.strip_prefix("http://") {
            Some(rest) if self.config.secure_login => format!("https://{rest}"),
            _ => url,
        }
    }

    /// Login request for the configured credentials.
    pub fn login_request(&self) -> Result<WebRequest> {
        let user = self
            .encode_name(&self.config.username)
            .map_err(|e| SessionError::InvalidSettings(e.to_string()))?;
        Ok(WebRequest::new(FetchKind::Login, self.login_url())
            .field("user", user)
            .field("password", self.config.password.as_bytes()))
    }

    /// Reload the buddy list. Presence updates seen on the socket from now
    /// on take precedence over the reply.
    pub fn refresh_friends(&mut self) {
        if self.friends_in_flight > 0 {
            // The older reply will be filtered against this refresh's set.
            warn!(
                in_flight = self.friends_in_flight,
                "Overlapping friend list refresh"
            );
        }
        self.friends_in_flight += 1;
        self.updated_status.clear();
        let request = WebRequest::new(FetchKind::Friends, self.web_url(FRIENDS_PATH))
            .field("session", self.token.clone().unwrap_or_default())
            .field("photo", "1")
            .field("utf8", "1")
            .session(self.token.as_deref());
        self.queue_fetch(request);
    }

    pub fn check_mail(&mut self) {
        let request =
            WebRequest::new(FetchKind::Mail, self.web_url(MAIL_PATH)).session(self.token.as_deref());
        self.queue_fetch(request);
    }

    pub fn load_prefs(&mut self) {
        let request = WebRequest::new(FetchKind::Prefs, self.web_url(PREFS_PATH))
            .field("session", self.token.clone().unwrap_or_default())
            .field("utf8", "1")
            .session(self.token.as_deref());
        self.queue_fetch(request);
    }

    /// Link to `target` on the website, logged in with this session.
    pub fn session_url(&self, target: &str) -> Option<String> {
        let token = self.token.as_deref()?;
        Some(session_url(&self.config.web_base, token, target))
    }

    /// Hand the reply of a finished fetch to its handler.
    pub fn on_fetch_complete(
        &mut self,
        request: WebRequest,
        reply: std::result::Result<FetchReply, WebError>,
    ) -> Result<()> {
        if self.is_closed() {
            debug!(kind = ?request.kind, "Fetch completed after teardown");
            return Ok(());
        }

        let json = |reply: std::result::Result<FetchReply, WebError>| match reply {
            Ok(FetchReply::Json(value)) => Ok(value),
            Ok(FetchReply::Bytes(_)) => Err(WebError::Json("expected a JSON reply".into())),
            Err(e) => Err(e),
        };

        match request.kind {
            FetchKind::Login => self.on_login_reply(json(reply)),
            FetchKind::Friends => self.on_friends_reply(json(reply)),
            FetchKind::Mail => self.on_mail_reply(json(reply)),
            FetchKind::Prefs => self.on_prefs_reply(json(reply)),
            FetchKind::BuddyIcon { buddy } => {
                match reply {
                    Ok(FetchReply::Bytes(data)) => self.emit(SessionEvent::BuddyIcon {
                        name: buddy,
                        url: Some(request.url),
                        data: Some(data),
                    }),
                    Ok(FetchReply::Json(_)) => {
                        warn!(buddy = %buddy, "Unexpected JSON reply for buddy icon")
                    }
                    Err(e) => warn!(buddy = %buddy, error = %e, "Could not fetch buddy icon"),
                }
                Ok(())
            }
        }
    }

    pub fn on_login_reply(&mut self, reply: std::result::Result<Value, WebError>) -> Result<()> {
        let value = reply.map_err(|e| {
            error!(error = %e, "Could not get web login");
            SessionError::Network("unable to get login reply from web server".into())
        })?;

        let invalid = || SessionError::Network("invalid json format received".into());
        let obj = value.as_object().ok_or_else(invalid)?;
        let status = obj.get("status").and_then(scalar).ok_or_else(invalid)?;
        if !status.starts_with(LOGIN_OK_PREFIX) {
            return Err(SessionError::AuthenticationFailed(status));
        }

        let token = obj
            .get("session")
            .and_then(scalar)
            .ok_or_else(|| SessionError::Network("no session found in json".into()))?;
        let username = obj
            .get("username")
            .and_then(scalar)
            .ok_or_else(|| SessionError::Network("no username found in json".into()))?;

        if self.nick_pattern.is_none() {
            let pattern = format!(r"(?i)\b{}s?\b", regex::escape(&username));
            let re = Regex::new(&pattern)
                .map_err(|e| SessionError::InvalidSettings(format!("error compiling nick regex: {e}")))?;
            self.nick_pattern = Some(re);
        }

        info!(user = %username, "Web login succeeded");
        self.token = Some(token);
        self.normalized_username = normalize(&username);
        self.username = username;
        self.mark(Milestone::WebLogin);
        Ok(())
    }

    /// Reconcile the buddy list with the friends reply.
    ///
    /// Entries are `[id, name, online, away, _, photo, _]`; anything else is
    /// skipped. Buddies missing from the reply are removed.
    pub fn on_friends_reply(&mut self, reply: std::result::Result<Value, WebError>) -> Result<()> {
        self.friends_in_flight = self.friends_in_flight.saturating_sub(1);
        let value = reply.map_err(|e| {
            error!(error = %e, "Friend list error");
            SessionError::Network("could not receive friend list".into())
        })?;
        let Value::Array(entries) = value else {
            return Err(SessionError::Network("invalid friend list format".into()));
        };

        let known: HashMap<String, BuddyEntry> = self
            .directory
            .buddies()
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect();
        let mut found = HashSet::new();

        for entry in &entries {
            let Some(fields) = entry.as_array().filter(|f| f.len() == FRIEND_ENTRY_LEN) else {
                debug!("Invalid friend list entry");
                continue;
            };
            let (Some(id), Some(name), Some(away), Some(photo)) = (
                scalar(&fields[0]),
                fields[1].as_str(),
                fields[3].as_str(),
                fields[5].as_str(),
            ) else {
                debug!("Incomplete friend list entry");
                continue;
            };
            let online = truthy(&fields[2]);

            self.sync_buddy(known.get(&id), &id, name, online, away, photo);
            found.insert(id);
        }

        for (id, buddy) in known {
            if found.contains(&id) {
                continue;
            }
            self.emit(SessionEvent::Notice {
                title: "Friend removed!".into(),
                text: format!("{} is not any more on your friend list", buddy.name),
            });
            self.emit(SessionEvent::BuddyRemoved {
                id,
                name: buddy.name,
            });
        }

        self.mark(Milestone::FriendList);
        Ok(())
    }

    fn sync_buddy(
        &mut self,
        known: Option<&BuddyEntry>,
        id: &str,
        name: &str,
        online: bool,
        away: &str,
        photo: &str,
    ) {
        match known {
            None => {
                debug!(buddy = %name, "Adding buddy");
                self.emit(SessionEvent::BuddyAdded {
                    id: id.to_owned(),
                    name: name.to_owned(),
                });
            }
            Some(buddy) if buddy.name != name => {
                self.emit(SessionEvent::Notice {
                    title: "Nick changed!".into(),
                    text: format!("{} is now known as {name}", buddy.name),
                });
                self.emit(SessionEvent::BuddyRenamed {
                    id: id.to_owned(),
                    old: buddy.name.clone(),
                    new: name.to_owned(),
                });
            }
            Some(_) => {}
        }

        let old_icon = known.and_then(|b| b.icon_url.as_deref());
        let new_icon = Some(photo).filter(|p| !p.is_empty());
        if old_icon != new_icon {
            match new_icon {
                Some(url) => {
                    let request = WebRequest::new(
                        FetchKind::BuddyIcon {
                            buddy: name.to_owned(),
                        },
                        url,
                    )
                    .session(self.token.as_deref());
                    self.queue_fetch(request);
                }
                None => self.emit(SessionEvent::BuddyIcon {
                    name: name.to_owned(),
                    url: None,
                    data: None,
                }),
            }
        }

        // A status received on the socket after the request is newer.
        if self.updated_status.contains(&normalize(name)) {
            return;
        }
        let presence = match (online, away.is_empty()) {
            (true, false) => Presence::Away(away.to_owned()),
            (true, true) => Presence::Available,
            (false, _) => Presence::Offline,
        };
        self.emit(SessionEvent::BuddyPresence {
            name: name.to_owned(),
            presence,
        });
    }

    /// Report new mail since the last checkpoint.
    ///
    /// Entries are `[id, _, state, subject, _, from, _, arrival, ...]`. A
    /// malformed reply is skipped; a failed request is fatal.
    pub fn on_mail_reply(&mut self, reply: std::result::Result<Value, WebError>) -> Result<()> {
        let value = reply.map_err(|e| {
            error!(error = %e, "Could not fetch mail");
            SessionError::Network("could not receive mail list".into())
        })?;

        match value {
            Value::Array(entries) => self.report_new_mail(&entries),
            other => debug!(reply = %other, "Mail reply is not a list"),
        }

        self.mark(Milestone::MailList);
        Ok(())
    }

    fn report_new_mail(&mut self, entries: &[Value]) {
        let last = self.last_mail_check.clone();
        let mut newest = last.clone();

        for entry in entries {
            let Some(fields) = entry
                .as_array()
                .filter(|f| f.len() >= MAIL_ENTRY_MIN_LEN)
            else {
                continue;
            };
            let (Some(id), Some(state), Some(subject), Some(from), Some(arrival)) = (
                fields[0].as_str(),
                fields[2].as_str(),
                fields[3].as_str(),
                fields[5].as_str(),
                fields[7].as_str(),
            ) else {
                continue;
            };
            let Ok(id) = id.parse::<i64>() else {
                debug!(id = %id, "Invalid integer in mail reply");
                continue;
            };
            if state != "new" || arrival <= last.as_str() {
                continue;
            }

            let Some(url) = self.session_url(&format!("/mail/display?hid={id:x}")) else {
                debug!(id, "No web session for mail link");
                continue;
            };
            self.emit(SessionEvent::NewMail {
                subject: subject.to_owned(),
                from: from.to_owned(),
                url,
            });
            if arrival > newest.as_str() {
                newest = arrival.to_owned();
            }
        }

        if newest != last {
            self.last_mail_check = newest.clone();
            self.emit(SessionEvent::MailCheckpoint {
                last_arrival: newest,
            });
        }
    }

    pub fn on_prefs_reply(&mut self, reply: std::result::Result<Value, WebError>) -> Result<()> {
        let value =
            reply.map_err(|e| SessionError::Network(format!("Could not receive prefs: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| SessionError::Network("Invalid prefs format received".into()))?;
        if !obj.get("prefsok").is_some_and(truthy) {
            return Err(SessionError::Network("Prefs not OK".into()));
        }
        self.mark(Milestone::Prefs);
        Ok(())
    }
}
