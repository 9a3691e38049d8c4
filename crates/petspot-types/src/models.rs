use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "MALE",
            Self::Female => "FEMALE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for Sex {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MALE" => Ok(Self::Male),
            "FEMALE" => Ok(Self::Female),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an announcement.
///
/// The server stores and returns `MISSING`/`FOUND`/`CLOSED`. Clients that
/// still speak the older `ACTIVE` vocabulary are mapped onto `MISSING` on
/// the way in; nothing is ever written back as `ACTIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnnouncementStatus {
    #[default]
    #[serde(alias = "ACTIVE")]
    Missing,
    Found,
    Closed,
}

impl AnnouncementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "MISSING",
            Self::Found => "FOUND",
            Self::Closed => "CLOSED",
        }
    }
}

impl FromStr for AnnouncementStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MISSING" | "ACTIVE" => Ok(Self::Missing),
            "FOUND" => Ok(Self::Found),
            "CLOSED" => Ok(Self::Closed),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for AnnouncementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// A lost or found pet report as returned to clients.
/// The management password hash never leaves the DB layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub pet_name: Option<String>,
    pub species: String,
    pub breed: Option<String>,
    pub sex: Sex,
    pub age: Option<i64>,
    pub description: Option<String>,
    pub microchip_number: Option<String>,
    pub location_latitude: f64,
    pub location_longitude: f64,
    pub last_seen_date: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub status: AnnouncementStatus,
    pub reward: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response to a successful create: the announcement plus its one-time
/// plaintext management password.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAnnouncement {
    #[serde(flatten)]
    pub announcement: Announcement,
    pub management_password: String,
}
