/// Database row types. These map directly to SQLite rows.
/// Distinct from petspot-types API models to keep the DB layer independent.

pub struct AnnouncementRow {
    pub id: String,
    pub pet_name: Option<String>,
    pub species: String,
    pub breed: Option<String>,
    pub sex: String,
    pub age: Option<i64>,
    pub description: Option<String>,
    pub microchip_number: Option<String>,
    pub location_latitude: f64,
    pub location_longitude: f64,
    pub last_seen_date: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub status: String,
    pub reward: Option<String>,
    pub management_password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Column values for a new announcement, already validated and sanitized.
#[derive(Debug, Clone, Default)]
pub struct NewAnnouncement {
    pub pet_name: Option<String>,
    pub species: String,
    pub breed: Option<String>,
    pub sex: String,
    pub age: Option<i64>,
    pub description: Option<String>,
    pub microchip_number: Option<String>,
    pub location_latitude: f64,
    pub location_longitude: f64,
    pub last_seen_date: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub reward: Option<String>,
}

/// Radius query around a point. `range_km` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFilter {
    pub lat: f64,
    pub lng: f64,
    pub range_km: f64,
}

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}
