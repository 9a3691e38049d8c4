//! Input checks injected into the services.
//!
//! Each concern is a trait with one production implementation, so tests
//! can swap in their own. Checks run in a fixed order and stop at the first
//! failure, which keeps the reported `{field, code}` stable for a given
//! payload.

use chrono::{NaiveDate, Utc};

use petspot_types::api::{CreateAnnouncementRequest, Credentials, ErrorCode};
use petspot_types::models::{AnnouncementStatus, Sex};

use crate::error::ApiError;

pub trait Validator<T>: Send + Sync {
    fn validate(&self, input: &T) -> Result<(), ApiError>;
}

/// Neutralizes free text before it is stored.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, input: &str) -> String;
}

pub trait LocationValidator: Send + Sync {
    fn validate(&self, lat: f64, lng: f64, range_km: f64) -> Result<(), ApiError>;
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ApiError> {
    non_blank(value).ok_or_else(|| ApiError::validation(field, ErrorCode::MissingValue))
}

fn invalid(field: &str) -> ApiError {
    ApiError::validation(field, ErrorCode::InvalidFormat)
}

// -- Announcements --

pub struct AnnouncementValidator;

impl Validator<CreateAnnouncementRequest> for AnnouncementValidator {
    fn validate(&self, req: &CreateAnnouncementRequest) -> Result<(), ApiError> {
        required("species", req.species.as_deref())?;

        let sex = required("sex", req.sex.as_deref())?;
        sex.parse::<Sex>().map_err(|_| invalid("sex"))?;

        let last_seen = required("lastSeenDate", req.last_seen_date.as_deref())?;
        let date = NaiveDate::parse_from_str(last_seen, "%Y-%m-%d")
            .map_err(|_| invalid("lastSeenDate"))?;
        if date > Utc::now().date_naive() {
            return Err(invalid("lastSeenDate"));
        }

        let lat = req
            .location_latitude
            .ok_or_else(|| ApiError::validation("locationLatitude", ErrorCode::MissingValue))?;
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(invalid("locationLatitude"));
        }

        let lng = req
            .location_longitude
            .ok_or_else(|| ApiError::validation("locationLongitude", ErrorCode::MissingValue))?;
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(invalid("locationLongitude"));
        }

        if req.age.is_some_and(|age| age < 0) {
            return Err(invalid("age"));
        }

        if let Some(chip) = non_blank(req.microchip_number.as_deref()) {
            if !chip.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("microchipNumber"));
            }
        }

        let email = non_blank(req.email.as_deref());
        let phone = non_blank(req.phone.as_deref());
        if email.is_none() && phone.is_none() {
            return Err(ApiError::validation("contact", ErrorCode::MissingValue));
        }
        if email.is_some_and(|e| !is_valid_email(e)) {
            return Err(invalid("email"));
        }
        if phone.is_some_and(|p| !is_valid_phone(p)) {
            return Err(invalid("phone"));
        }

        if let Some(status) = non_blank(req.status.as_deref()) {
            status
                .parse::<AnnouncementStatus>()
                .map_err(|_| invalid("status"))?;
        }

        Ok(())
    }
}

// -- Users --

/// Checks the `{email, password}` body. Registration additionally
/// enforces a minimum password length; login only needs the shape.
pub struct CredentialsValidator {
    min_password_len: Option<usize>,
}

pub const MIN_PASSWORD_LEN: usize = 8;

impl CredentialsValidator {
    pub fn registration() -> Self {
        Self {
            min_password_len: Some(MIN_PASSWORD_LEN),
        }
    }

    pub fn login() -> Self {
        Self {
            min_password_len: None,
        }
    }
}

impl Validator<Credentials> for CredentialsValidator {
    fn validate(&self, creds: &Credentials) -> Result<(), ApiError> {
        let email = required("email", creds.email.as_deref())?;
        if !is_valid_email(email) {
            return Err(invalid("email"));
        }

        // Passwords are not trimmed; only an empty one counts as missing.
        let password = creds
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::validation("password", ErrorCode::MissingValue))?;
        if let Some(min) = self.min_password_len {
            if password.chars().count() < min {
                return Err(invalid("password"));
            }
        }

        Ok(())
    }
}

// -- Location --

pub struct CoordinateValidator;

impl LocationValidator for CoordinateValidator {
    fn validate(&self, lat: f64, lng: f64, range_km: f64) -> Result<(), ApiError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(invalid("lat"));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(invalid("lng"));
        }
        if !range_km.is_finite() || range_km <= 0.0 {
            return Err(invalid("range"));
        }
        Ok(())
    }
}

// -- Sanitizing --

/// Trims, drops control characters (newlines and tabs survive) and escapes
/// the HTML-significant characters.
pub struct HtmlSanitizer;

impl Sanitizer for HtmlSanitizer {
    fn sanitize(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.trim().chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '\n' | '\t' => out.push(c),
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
        out
    }
}

fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=20).contains(&phone.chars().count())
        && digits >= 7
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')'))
}
