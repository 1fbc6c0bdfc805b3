//! The host application's view of buddies, rooms and conversations.
//!
//! The session only ever *queries* the directory; all mutations arrive as
//! [`SessionEvent`]s through [`Directory::apply`]. [`MemoryDirectory`] is an
//! in-memory implementation used by the CLI and the tests.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use spin_shared::{normalize, MemberFlags, Presence};

use crate::events::SessionEvent;

/// One entry of the buddy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuddyEntry {
    pub id: String,
    pub name: String,
    pub presence: Presence,
    pub icon_url: Option<String>,
}

pub trait Directory: Send {
    /// Whether a chat window for `room` exists.
    fn has_chat(&self, room: &str) -> bool;

    /// Display names of all open chats.
    fn chats(&self) -> Vec<String>;

    fn member_flags(&self, room: &str, user: &str) -> MemberFlags;

    /// Presence of a buddy, `None` if `name` isn't on the buddy list.
    fn buddy(&self, name: &str) -> Option<Presence>;

    fn buddies(&self) -> Vec<BuddyEntry>;

    /// Whether a private conversation with `user` is open.
    fn has_conversation(&self, user: &str) -> bool;

    fn open_conversation(&mut self, user: &str);

    fn apply(&mut self, event: &SessionEvent);
}

#[derive(Debug, Clone, Default)]
struct ChatState {
    name: String,
    members: HashMap<String, (String, MemberFlags)>,
}

/// In-memory [`Directory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    buddies: HashMap<String, BuddyEntry>,
    chats: HashMap<String, ChatState>,
    conversations: HashSet<String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members of `room` with their flags, sorted by name.
    pub fn members(&self, room: &str) -> Vec<(String, MemberFlags)> {
        let mut members: Vec<_> = self
            .chats
            .get(&normalize(room))
            .map(|c| c.members.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }

    fn buddy_by_name(&self, name: &str) -> Option<&BuddyEntry> {
        let key = normalize(name);
        self.buddies.values().find(|b| normalize(&b.name) == key)
    }

    fn buddy_by_name_mut(&mut self, name: &str) -> Option<&mut BuddyEntry> {
        let key = normalize(name);
        self.buddies.values_mut().find(|b| normalize(&b.name) == key)
    }

    fn chat_mut(&mut self, room: &str) -> Option<&mut ChatState> {
        self.chats.get_mut(&normalize(room))
    }
}

impl Directory for MemoryDirectory {
    fn has_chat(&self, room: &str) -> bool {
        self.chats.contains_key(&normalize(room))
    }

    fn chats(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chats.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    fn member_flags(&self, room: &str, user: &str) -> MemberFlags {
        self.chats
            .get(&normalize(room))
            .and_then(|c| c.members.get(&normalize(user)))
            .map(|(_, flags)| *flags)
            .unwrap_or_default()
    }

    fn buddy(&self, name: &str) -> Option<Presence> {
        self.buddy_by_name(name).map(|b| b.presence.clone())
    }

    fn buddies(&self) -> Vec<BuddyEntry> {
        let mut list: Vec<BuddyEntry> = self.buddies.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    fn has_conversation(&self, user: &str) -> bool {
        self.conversations.contains(&normalize(user))
    }

    fn open_conversation(&mut self, user: &str) {
        self.conversations.insert(normalize(user));
    }

    fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::BuddyAdded { id, name } => {
                self.buddies.insert(
                    id.clone(),
                    BuddyEntry {
                        id: id.clone(),
                        name: name.clone(),
                        presence: Presence::Offline,
                        icon_url: None,
                    },
                );
            }
            SessionEvent::BuddyRenamed { id, new, .. } => {
                if let Some(buddy) = self.buddies.get_mut(id) {
                    buddy.name = new.clone();
                }
            }
            SessionEvent::BuddyRemoved { id, .. } => {
                self.buddies.remove(id);
            }
            SessionEvent::BuddyIcon { name, url, .. } => {
                if let Some(buddy) = self.buddy_by_name_mut(name) {
                    buddy.icon_url = url.clone();
                }
            }
            SessionEvent::BuddyPresence { name, presence } => {
                if let Some(buddy) = self.buddy_by_name_mut(name) {
                    buddy.presence = presence.clone();
                }
            }
            SessionEvent::PrivateMessage { from, .. } => {
                self.conversations.insert(normalize(from));
            }
            SessionEvent::ChatJoined { room, .. } => {
                self.chats.entry(normalize(room)).or_insert_with(|| ChatState {
                    name: room.clone(),
                    members: HashMap::new(),
                });
            }
            SessionEvent::ChatLeft { room, .. } => {
                self.chats.remove(&normalize(room));
            }
            SessionEvent::ChatUserJoined { room, user, flags }
            | SessionEvent::ChatFlags { room, user, flags } => {
                if let Some(chat) = self.chat_mut(room) {
                    chat.members.insert(normalize(user), (user.clone(), *flags));
                }
            }
            SessionEvent::ChatUserLeft { room, user, .. } => {
                if let Some(chat) = self.chat_mut(room) {
                    chat.members.remove(&normalize(user));
                }
            }
            SessionEvent::ChatRoster { room, members } => {
                if let Some(chat) = self.chat_mut(room) {
                    for (user, flags) in members {
                        chat.members.insert(normalize(user), (user.clone(), *flags));
                    }
                }
            }
            SessionEvent::ChatRosterCleared { room } => {
                if let Some(chat) = self.chat_mut(room) {
                    chat.members.clear();
                }
            }
            _ => return,
        }
        debug!(?event, "Directory updated");
    }
}
