pub mod announcements;
pub mod auth;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod photos;
pub mod routes;
pub mod state;
pub mod sweep;
pub mod validation;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

use tracing::error;

/// Run blocking DB or filesystem work off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
    })?
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;

    use petspot_crypto::PasswordHasher;
    use petspot_db::Database;
    use petspot_types::api::CreateAnnouncementRequest;
    use tempfile::TempDir;

    use crate::state::{AppState, AppStateInner};

    pub const JWT_SECRET: &str = "test-secret";

    /// Smallest byte string `image` recognizes as PNG.
    pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    pub struct TestApp {
        pub state: AppState,
        pub image_dir: PathBuf,
        _dir: TempDir,
    }

    pub fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join("images");
        let db = Arc::new(Database::open_in_memory().unwrap());
        let hasher = PasswordHasher::with_cost(256, 1, 1).unwrap();
        let state = Arc::new(AppStateInner::new(
            db,
            hasher,
            image_dir.clone(),
            JWT_SECRET.to_string(),
        ));

        TestApp {
            state,
            image_dir,
            _dir: dir,
        }
    }

    pub fn valid_request() -> CreateAnnouncementRequest {
        CreateAnnouncementRequest {
            pet_name: Some("Burek".into()),
            species: Some("DOG".into()),
            breed: Some("Mixed".into()),
            sex: Some("MALE".into()),
            age: Some(3),
            description: Some("Brown collar".into()),
            microchip_number: None,
            location_latitude: Some(52.2297),
            location_longitude: Some(21.0122),
            last_seen_date: Some("2025-01-10".into()),
            email: Some("owner@example.com".into()),
            phone: None,
            status: None,
            reward: None,
        }
    }
}
