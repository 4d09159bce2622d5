use std::fmt;

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::store::{Collection, Stamp};

use super::ChatError;

/// Provider-issued user identifier, e.g. `google:1043...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err("user id must not be empty".to_owned());
        }
        Ok(Self(value))
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A trimmed, non-empty display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyUsername);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: Option<DisplayName>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

const ROOM_KEY_LEN: usize = 6;
const ROOM_KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Short shareable room key: six lowercase letters or digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey(String);

impl RoomKey {
    /// Accepts what a user would type: surrounding spaces and capitals are fine.
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let key = raw.trim().to_ascii_lowercase();
        if key.len() != ROOM_KEY_LEN || !key.bytes().all(|b| ROOM_KEY_ALPHABET.contains(&b)) {
            return Err(ChatError::InvalidRoomKey(raw.to_owned()));
        }
        Ok(Self(key))
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(
            (0..ROOM_KEY_LEN)
                .filter_map(|_| ROOM_KEY_ALPHABET.choose(rng))
                .map(|b| char::from(*b))
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomKey {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomKey> for String {
    fn from(value: RoomKey) -> Self {
        value.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub key: RoomKey,
    pub creator: UserId,
    pub created_at: Stamp,
}

/// The two ends of a direct conversation, stored lowest id first so both
/// participants address the same context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(UserId, UserId)", into = "(UserId, UserId)")]
pub struct DirectPair(UserId, UserId);

impl DirectPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    pub fn contains(&self, user: &UserId) -> bool {
        &self.0 == user || &self.1 == user
    }
}

impl From<(UserId, UserId)> for DirectPair {
    fn from((a, b): (UserId, UserId)) -> Self {
        Self::new(a, b)
    }
}

impl From<DirectPair> for (UserId, UserId) {
    fn from(DirectPair(a, b): DirectPair) -> Self {
        (a, b)
    }
}

/// Where a message goes: a room, or a direct conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    Room(RoomKey),
    Direct(DirectPair),
}

impl Context {
    pub fn messages(&self) -> Collection {
        match self {
            Context::Room(key) => Collection::new(format!("rooms/{key}/messages")),
            Context::Direct(DirectPair(a, b)) => Collection::new(format!(
                "direct/{}/{}/messages",
                urlencoding::encode(a.as_str()),
                urlencoding::encode(b.as_str())
            )),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Room(key) => write!(f, "room:{key}"),
            Context::Direct(DirectPair(a, b)) => write!(f, "direct:{a}~{b}"),
        }
    }
}

/// Who sent a message, as they looked when they sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    pub display_name: DisplayName,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub context: Context,
    pub sender: Sender,
    pub body: String,
    pub sent_at: Stamp,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct UserDoc {
    pub(crate) display_name: Option<DisplayName>,
    pub(crate) avatar_url: Option<String>,
    pub(crate) email: Option<String>,
}

impl UserDoc {
    pub(crate) fn from_user(user: &User) -> Self {
        Self {
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            email: user.email.clone(),
        }
    }

    pub(crate) fn into_user(self, id: UserId) -> User {
        User {
            id,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            email: self.email,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct RoomDoc {
    pub(crate) creator: UserId,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct MessageDoc {
    pub(crate) context: Context,
    pub(crate) sender: Sender,
    pub(crate) body: String,
}
