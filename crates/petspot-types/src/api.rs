use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// Access token claims. `exp - iat` is always the token lifetime (one hour).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

// -- Users --

/// Registration and login body. Fields are optional so that a missing
/// value is reported as a validation error instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: String,
    pub access_token: String,
}

// -- Announcements --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnnouncementRequest {
    pub pet_name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub sex: Option<String>,
    pub age: Option<i64>,
    pub description: Option<String>,
    pub microchip_number: Option<String>,
    pub location_latitude: Option<f64>,
    pub location_longitude: Option<f64>,
    pub last_seen_date: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub reward: Option<String>,
}

/// `GET /api/v1/announcements` query string. Range is in kilometres.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnouncementQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub range: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUploadResponse {
    pub photo_url: String,
}

// -- Errors --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingValue,
    InvalidFormat,
    InvalidFileFormat,
    Conflict,
    NotFound,
    InvalidCredentials,
    Unauthenticated,
    PayloadTooLarge,
    InternalServerError,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
