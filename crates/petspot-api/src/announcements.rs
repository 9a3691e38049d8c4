use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use petspot_crypto::{PasswordHasher, generate_management_password};
use petspot_db::models::{AnnouncementRow, LocationFilter, NewAnnouncement};
use petspot_db::{Database, is_unique_violation};
use petspot_types::api::{AnnouncementQuery, Claims, CreateAnnouncementRequest, ErrorCode};
use petspot_types::models::{Announcement, AnnouncementStatus, CreatedAnnouncement, Sex};

use crate::blocking;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::photos::PhotoUploadService;
use crate::state::AppState;
use crate::validation::{LocationValidator, Sanitizer, Validator, non_blank, required};

/// Search radius used when a query gives a point but no range.
pub const DEFAULT_RANGE_KM: f64 = 5.0;

pub struct AnnouncementService {
    db: Arc<Database>,
    hasher: Arc<PasswordHasher>,
    photos: Arc<PhotoUploadService>,
    validator: Arc<dyn Validator<CreateAnnouncementRequest>>,
    sanitizer: Arc<dyn Sanitizer>,
    location_validator: Arc<dyn LocationValidator>,
}

impl AnnouncementService {
    pub fn new(
        db: Arc<Database>,
        hasher: Arc<PasswordHasher>,
        photos: Arc<PhotoUploadService>,
        validator: Arc<dyn Validator<CreateAnnouncementRequest>>,
        sanitizer: Arc<dyn Sanitizer>,
        location_validator: Arc<dyn LocationValidator>,
    ) -> Self {
        Self {
            db,
            hasher,
            photos,
            validator,
            sanitizer,
            location_validator,
        }
    }

    /// Announcements with a photo, optionally limited to a radius.
    /// `lat` and `lng` go together; `range` needs both of them.
    pub async fn get_all_announcements(
        &self,
        query: &AnnouncementQuery,
    ) -> Result<Vec<Announcement>, ApiError> {
        let filter = match (query.lat, query.lng, query.range) {
            (None, None, None) => None,
            (Some(lat), Some(lng), range) => {
                let range_km = range.unwrap_or(DEFAULT_RANGE_KM);
                self.location_validator.validate(lat, lng, range_km)?;
                Some(LocationFilter { lat, lng, range_km })
            }
            (None, _, _) => return Err(ApiError::validation("lat", ErrorCode::MissingValue)),
            (Some(_), None, _) => {
                return Err(ApiError::validation("lng", ErrorCode::MissingValue));
            }
        };

        let db = self.db.clone();
        let rows = blocking(move || Ok(db.find_announcements(filter)?)).await?;
        Ok(rows.into_iter().map(to_announcement).collect())
    }

    pub async fn get_announcement_by_id(&self, id: &str) -> Result<Announcement, ApiError> {
        self.find_row(id).await.map(to_announcement)
    }

    /// Validate, sanitize and store a new announcement. The returned
    /// management password is the only copy in plaintext.
    pub async fn create_announcement(
        &self,
        req: CreateAnnouncementRequest,
    ) -> Result<CreatedAnnouncement, ApiError> {
        self.validator.validate(&req)?;

        let microchip_number = non_blank(req.microchip_number.as_deref()).map(str::to_string);
        if let Some(number) = microchip_number.clone() {
            let db = self.db.clone();
            if blocking(move || Ok(db.microchip_exists(&number)?)).await? {
                return Err(ApiError::Conflict("Microchip number already in use".into()));
            }
        }

        let sex: Sex = required("sex", req.sex.as_deref())?
            .parse()
            .map_err(|_| ApiError::validation("sex", ErrorCode::InvalidFormat))?;
        let status = match non_blank(req.status.as_deref()) {
            Some(s) => s
                .parse()
                .map_err(|_| ApiError::validation("status", ErrorCode::InvalidFormat))?,
            None => AnnouncementStatus::default(),
        };

        // Sanitizing can empty a value that passed validation.
        let species = self.sanitizer.sanitize(required("species", req.species.as_deref())?);
        if species.is_empty() {
            return Err(ApiError::validation("species", ErrorCode::MissingValue));
        }

        let data = NewAnnouncement {
            pet_name: self.sanitize_opt(req.pet_name.as_deref()),
            species,
            breed: self.sanitize_opt(req.breed.as_deref()),
            sex: sex.as_str().to_string(),
            age: req.age,
            description: self.sanitize_opt(req.description.as_deref()),
            microchip_number,
            location_latitude: req.location_latitude.ok_or_else(|| {
                ApiError::validation("locationLatitude", ErrorCode::MissingValue)
            })?,
            location_longitude: req.location_longitude.ok_or_else(|| {
                ApiError::validation("locationLongitude", ErrorCode::MissingValue)
            })?,
            last_seen_date: required("lastSeenDate", req.last_seen_date.as_deref())?.to_string(),
            email: non_blank(req.email.as_deref()).map(str::to_string),
            phone: non_blank(req.phone.as_deref()).map(str::to_string),
            status: status.as_str().to_string(),
            reward: self.sanitize_opt(req.reward.as_deref()),
        };

        let management_password = generate_management_password();

        let db = self.db.clone();
        let hasher = self.hasher.clone();
        let password = management_password.clone();
        let row = blocking(move || {
            db.create_announcement(&data, &password, &hasher)
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::Conflict("Microchip number already in use".into())
                    } else {
                        ApiError::Internal(e)
                    }
                })
        })
        .await?;

        info!("Announcement {} created", row.id);

        Ok(CreatedAnnouncement {
            announcement: to_announcement(row),
            management_password,
        })
    }

    /// Delete an announcement. Its photo goes first, best-effort; a missing
    /// or undeletable file never blocks the row delete.
    pub async fn delete_announcement(&self, id: &str) -> Result<(), ApiError> {
        let row = self.find_row(id).await?;

        if let Some(photo_url) = row.photo_url.as_deref() {
            self.photos.delete_photos(photo_url).await;
        }

        let db = self.db.clone();
        let row_id = row.id;
        let deleted = blocking(move || Ok(db.delete_announcement(&row_id)?)).await?;
        if !deleted {
            return Err(ApiError::NotFound("Announcement"));
        }

        Ok(())
    }

    /// Check a management password for `id`. Unknown ids are `NotFound`,
    /// wrong passwords `Unauthenticated`.
    pub async fn verify_management_password(&self, id: &str, password: &str) -> Result<(), ApiError> {
        let row = self.find_row(id).await?;

        let hasher = self.hasher.clone();
        let password = password.to_string();
        let ok = blocking(move || Ok(hasher.verify(&password, &row.management_password_hash))).await?;

        if ok {
            Ok(())
        } else {
            warn!("Rejected management password for announcement {}", id);
            Err(ApiError::Unauthenticated)
        }
    }

    async fn find_row(&self, id: &str) -> Result<AnnouncementRow, ApiError> {
        let db = self.db.clone();
        let id = id.to_string();
        blocking(move || Ok(db.find_announcement(&id)?))
            .await?
            .ok_or(ApiError::NotFound("Announcement"))
    }

    fn sanitize_opt(&self, value: Option<&str>) -> Option<String> {
        non_blank(value)
            .map(|v| self.sanitizer.sanitize(v))
            .filter(|v| !v.is_empty())
    }
}

pub(crate) fn to_announcement(row: AnnouncementRow) -> Announcement {
    Announcement {
        sex: row.sex.parse().unwrap_or_else(|e| {
            warn!("Corrupt sex on announcement '{}': {}", row.id, e);
            Sex::Unknown
        }),
        status: row.status.parse().unwrap_or_else(|e| {
            warn!("Corrupt status on announcement '{}': {}", row.id, e);
            AnnouncementStatus::default()
        }),
        created_at: parse_timestamp(&row.id, &row.created_at),
        updated_at: parse_timestamp(&row.id, &row.updated_at),
        id: row.id,
        pet_name: row.pet_name,
        species: row.species,
        breed: row.breed,
        age: row.age,
        description: row.description,
        microchip_number: row.microchip_number,
        location_latitude: row.location_latitude,
        location_longitude: row.location_longitude,
        last_seen_date: row.last_seen_date,
        email: row.email,
        phone: row.phone,
        photo_url: row.photo_url,
        reward: row.reward,
    }
}

fn parse_timestamp(id: &str, value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on announcement '{}': {}", value, id, e);
            DateTime::default()
        })
}

// -- Handlers --

/// GET /api/v1/announcements?lat=&lng=&range=
pub async fn list_announcements(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AnnouncementQuery>,
) -> Result<Json<Vec<Announcement>>, ApiError> {
    let announcements = state.announcements.get_all_announcements(&query).await?;
    Ok(Json(announcements))
}

/// GET /api/v1/announcements/{id}
pub async fn get_announcement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Announcement>, ApiError> {
    let announcement = state.announcements.get_announcement_by_id(&id).await?;
    Ok(Json(announcement))
}

/// POST /api/v1/announcements
pub async fn create_announcement(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateAnnouncementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.announcements.create_announcement(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// DELETE /api/v1/announcements/{id} (bearer token required)
/// Any authenticated account may delete; announcements have no owner.
pub async fn delete_announcement(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    state.announcements.delete_announcement(&id).await?;
    info!("Announcement {} deleted by user {}", id, claims.user_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PNG_BYTES, test_app, valid_request};
    use bytes::Bytes;

    #[tokio::test]
    async fn create_returns_password_matching_stored_hash() {
        let app = test_app();
        let created = app
            .state
            .announcements
            .create_announcement(valid_request())
            .await
            .unwrap();

        assert!(!created.management_password.is_empty());
        assert!(created.announcement.photo_url.is_none());
        assert_eq!(created.announcement.status, AnnouncementStatus::Missing);

        let row = app.state.db.find_announcement(&created.announcement.id).unwrap().unwrap();
        let hasher = PasswordHasher::with_cost(256, 1, 1).unwrap();
        assert!(hasher.verify(&created.management_password, &row.management_password_hash));

        app.state
            .announcements
            .verify_management_password(&created.announcement.id, &created.management_password)
            .await
            .unwrap();
        let err = app
            .state
            .announcements
            .verify_management_password(&created.announcement.id, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
    }

    #[tokio::test]
    async fn duplicate_microchip_is_conflict() {
        let app = test_app();
        let mut req = valid_request();
        req.microchip_number = Some("985112345678901".into());

        app.state.announcements.create_announcement(req.clone()).await.unwrap();
        let err = app.state.announcements.create_announcement(req).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn free_text_is_sanitized() {
        let app = test_app();
        let mut req = valid_request();
        req.pet_name = Some("<b>Rex</b>".into());
        req.status = Some("ACTIVE".into());

        let created = app.state.announcements.create_announcement(req).await.unwrap();
        assert_eq!(created.announcement.pet_name.as_deref(), Some("&lt;b&gt;Rex&lt;/b&gt;"));
        assert_eq!(created.announcement.status, AnnouncementStatus::Missing);
    }

    #[tokio::test]
    async fn species_of_control_characters_is_missing() {
        let app = test_app();
        let mut req = valid_request();
        req.species = Some("\u{7}\u{8}".into());

        let err = app.state.announcements.create_announcement(req).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Validation { ref field, code: ErrorCode::MissingValue } if field == "species"
        ));

        let stored: i64 = app
            .state
            .db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM announcement", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn query_needs_lat_and_lng_together() {
        let app = test_app();
        let service = &app.state.announcements;

        let only_lat = AnnouncementQuery { lat: Some(52.0), ..Default::default() };
        let err = service.get_all_announcements(&only_lat).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { ref field, .. } if field == "lng"));

        let only_range = AnnouncementQuery { range: Some(3.0), ..Default::default() };
        let err = service.get_all_announcements(&only_range).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { ref field, .. } if field == "lat"));

        let bad_lat = AnnouncementQuery { lat: Some(95.0), lng: Some(21.0), range: None };
        assert!(service.get_all_announcements(&bad_lat).await.is_err());
    }

    #[tokio::test]
    async fn default_range_is_five_km() {
        let app = test_app();
        let created = app
            .state
            .announcements
            .create_announcement(valid_request())
            .await
            .unwrap();
        app.state
            .photos
            .upload_photo(&created.announcement.id, Bytes::from_static(PNG_BYTES))
            .await
            .unwrap();

        // ~4.4 km north of the announcement
        let near = AnnouncementQuery { lat: Some(52.2697), lng: Some(21.0122), range: None };
        assert_eq!(app.state.announcements.get_all_announcements(&near).await.unwrap().len(), 1);

        // ~5.6 km north
        let far = AnnouncementQuery { lat: Some(52.2797), lng: Some(21.0122), range: None };
        assert!(app.state.announcements.get_all_announcements(&far).await.unwrap().is_empty());

        let all = app
            .state
            .announcements
            .get_all_announcements(&AnnouncementQuery::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn get_and_delete_unknown_is_not_found() {
        let app = test_app();
        let err = app.state.announcements.get_announcement_by_id("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err = app.state.announcements.delete_announcement("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_succeeds_when_photo_file_is_gone() {
        let app = test_app();
        let created = app
            .state
            .announcements
            .create_announcement(valid_request())
            .await
            .unwrap();
        let id = created.announcement.id;
        app.state
            .photos
            .upload_photo(&id, Bytes::from_static(PNG_BYTES))
            .await
            .unwrap();

        std::fs::remove_file(app.image_dir.join(format!("{}.png", id))).unwrap();

        app.state.announcements.delete_announcement(&id).await.unwrap();
        assert!(app.state.db.find_announcement(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_photo_file() {
        let app = test_app();
        let created = app
            .state
            .announcements
            .create_announcement(valid_request())
            .await
            .unwrap();
        let id = created.announcement.id;
        app.state
            .photos
            .upload_photo(&id, Bytes::from_static(PNG_BYTES))
            .await
            .unwrap();

        let path = app.image_dir.join(format!("{}.png", id));
        assert!(path.exists());
        app.state.announcements.delete_announcement(&id).await.unwrap();
        assert!(!path.exists());
    }
}
