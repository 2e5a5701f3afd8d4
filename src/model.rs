use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::auth::ProviderIdentity;

pub const DEFAULT_DISPLAY_NAME: &str = "Staff";
const AVATAR_URL: &str = "https://ui-avatars.com/api/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Doctor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Staff => "staff",
            Doctor => "doctor",
            Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Role::*;
        match s {
            "staff" => Ok(Staff),
            "doctor" => Ok(Doctor),
            "admin" => Ok(Admin),
            other => Err(format!("unknown role {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl UserProfile {
    /// Applies the placeholder name and generated avatar when the provider leaves them out.
    pub fn from_identity(identity: ProviderIdentity) -> UserProfile {
        let ProviderIdentity { uid, display_name, email, photo_url } = identity;
        let display_name = display_name.filter(|name| !name.trim().is_empty());
        let photo_url = photo_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| avatar_url(display_name.as_deref().unwrap_or("S")));

        UserProfile {
            uid,
            display_name: display_name.unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_owned()),
            email: email.unwrap_or_default(),
            photo_url,
            role: None,
        }
    }
}

fn avatar_url(name: &str) -> String {
    match reqwest::Url::parse_with_params(AVATAR_URL, &[("name", name), ("background", "random")]) {
        Ok(url) => url.into(),
        Err(_) => AVATAR_URL.to_owned(),
    }
}

/// Uids that have seen a message, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadSet(Vec<String>);

impl ReadSet {
    pub fn new() -> ReadSet {
        ReadSet(Vec::new())
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.0.iter().any(|seen| seen == uid)
    }

    /// Set union with a single uid. Returns false when it was already present.
    pub fn insert(&mut self, uid: &str) -> bool {
        if self.contains(uid) {
            return false;
        }
        self.0.push(uid.to_owned());
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ReadSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ReadSet::new();
        for uid in iter {
            set.insert(uid.as_ref());
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_photo: String,
    pub timestamp: i64,
    pub is_important: bool,
    pub read_by: ReadSet,
}

impl Message {
    pub fn from_new(id: String, new: NewMessage) -> Message {
        let NewMessage { text, sender_id, sender_name, sender_photo, timestamp, is_important, read_by } = new;
        Message { id, text, sender_id, sender_name, sender_photo, timestamp, is_important, read_by }
    }
}

/// A message record before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_photo: String,
    pub timestamp: i64,
    pub is_important: bool,
    pub read_by: ReadSet,
}

impl NewMessage {
    pub fn compose(sender: &UserProfile, text: String, is_important: bool, timestamp: i64) -> NewMessage {
        NewMessage {
            text,
            sender_id: sender.uid.clone(),
            sender_name: sender.display_name.clone(),
            sender_photo: sender.photo_url.clone(),
            timestamp,
            is_important,
            read_by: ReadSet::from_iter([&sender.uid]),
        }
    }
}

/// Local wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(display_name: Option<&str>, photo_url: Option<&str>) -> ProviderIdentity {
        ProviderIdentity {
            uid: "u1".to_owned(),
            display_name: display_name.map(str::to_owned),
            email: None,
            photo_url: photo_url.map(str::to_owned),
        }
    }

    #[test]
    fn profile_defaults_name_and_avatar() {
        let profile = UserProfile::from_identity(identity(None, None));

        assert_eq!(profile.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(profile.email, "");
        assert_eq!(profile.photo_url, "https://ui-avatars.com/api/?name=S&background=random");
        assert_eq!(profile.role, None);
    }

    #[test]
    fn profile_avatar_uses_display_name() {
        let profile = UserProfile::from_identity(identity(Some("Aiko Tanaka"), Some("")));

        assert_eq!(profile.display_name, "Aiko Tanaka");
        assert!(profile.photo_url.starts_with(AVATAR_URL));
        assert!(profile.photo_url.contains("name=Aiko+Tanaka"));
    }

    #[test]
    fn profile_keeps_provider_photo() {
        let profile = UserProfile::from_identity(identity(Some("Ken"), Some("https://example.com/ken.png")));
        assert_eq!(profile.photo_url, "https://example.com/ken.png");
    }

    #[test]
    fn read_set_insert_is_set_union() {
        let mut once = ReadSet::from_iter(["sender"]);
        assert!(once.insert("reader"));

        let mut twice = once.clone();
        assert!(!twice.insert("reader"));

        assert_eq!(once, twice);
        assert_eq!(twice.iter().collect::<Vec<_>>(), ["sender", "reader"]);
    }

    #[test]
    fn composed_message_is_read_by_its_sender() {
        let sender = UserProfile::from_identity(identity(Some("Ken"), None));
        let new = NewMessage::compose(&sender, "hello".to_owned(), true, 42);

        assert!(new.read_by.contains(&sender.uid));
        assert_eq!(new.read_by.len(), 1);
        assert_eq!(new.sender_name, "Ken");
        assert!(new.is_important);
    }

    #[test]
    fn message_serializes_with_record_field_names() {
        let sender = UserProfile::from_identity(identity(Some("Ken"), None));
        let message = Message::from_new("m1".to_owned(), NewMessage::compose(&sender, "hi".to_owned(), false, 7));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["isImportant"], false);
        assert_eq!(json["readBy"], serde_json::json!(["u1"]));
    }
}
