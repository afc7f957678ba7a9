use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Column order of the subscriber table.
pub const SUBSCRIBER_COLUMNS: [&str; 6] = [
    "chat_id",
    "username",
    "first_name",
    "last_name",
    "date_added",
    "is_active",
];

/// What the bot platform tells us about a chat when it first interacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberProfile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl SubscriberProfile {
    pub fn new(
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Self {
        Self {
            username: username.unwrap_or_default().to_owned(),
            first_name: first_name.unwrap_or_default().to_owned(),
            last_name: last_name.unwrap_or_default().to_owned(),
        }
    }

    /// Best human-readable name available, falling back to the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            full.to_owned()
        } else if !self.username.is_empty() {
            format!("@{}", self.username)
        } else {
            "unknown".to_owned()
        }
    }
}

/// One row of the durable subscriber table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(rename = "chat_id")]
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Empty or unreadable stamps in older tables load as `None`.
    #[serde(with = "date_added", default)]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(with = "active_flag", default = "active_by_default")]
    pub is_active: bool,
}

impl Subscriber {
    pub fn new(id: i64, profile: SubscriberProfile, date_added: DateTime<Utc>) -> Self {
        Self {
            id,
            username: profile.username,
            first_name: profile.first_name,
            last_name: profile.last_name,
            date_added: Some(date_added),
            is_active: true,
        }
    }
}

fn active_by_default() -> bool {
    true
}

// Rows are written as RFC 3339. Older tables carry local "YYYY-MM-DD HH:MM:SS" stamps.
mod date_added {
    use super::*;
    use serde::{Deserializer, Serializer};

    const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => s.serialize_str(&at.to_rfc3339()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(parse(raw.trim()))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, LEGACY_FORMAT).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }
}

// Stored as "True"/"False"; any casing is accepted and an empty cell means active.
mod active_flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *value { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "true" => Ok(true),
            "false" => Ok(false),
            other => Err(de::Error::custom(format!("invalid is_active: {other:?}"))),
        }
    }
}
