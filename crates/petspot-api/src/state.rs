use std::path::PathBuf;
use std::sync::Arc;

use petspot_crypto::PasswordHasher;
use petspot_db::Database;

use crate::announcements::AnnouncementService;
use crate::auth::UserService;
use crate::photos::PhotoUploadService;
use crate::validation::{
    AnnouncementValidator, CoordinateValidator, CredentialsValidator, HtmlSanitizer,
};

pub type AppState = Arc<AppStateInner>;

/// Services built once at startup and shared by every request.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub announcements: AnnouncementService,
    pub photos: Arc<PhotoUploadService>,
    pub users: UserService,
}

impl AppStateInner {
    /// Wire the production validators and sanitizer into the services.
    pub fn new(
        db: Arc<Database>,
        hasher: PasswordHasher,
        image_dir: PathBuf,
        jwt_secret: String,
    ) -> Self {
        let hasher = Arc::new(hasher);
        let photos = Arc::new(PhotoUploadService::new(db.clone(), image_dir));

        let announcements = AnnouncementService::new(
            db.clone(),
            hasher.clone(),
            photos.clone(),
            Arc::new(AnnouncementValidator),
            Arc::new(HtmlSanitizer),
            Arc::new(CoordinateValidator),
        );

        let users = UserService::new(
            db.clone(),
            hasher,
            jwt_secret,
            Arc::new(CredentialsValidator::registration()),
            Arc::new(CredentialsValidator::login()),
        );

        Self {
            db,
            announcements,
            photos,
            users,
        }
    }
}
