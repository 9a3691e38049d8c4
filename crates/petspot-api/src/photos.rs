use std::collections::HashSet;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use image::ImageFormat;
use tracing::{info, warn};

use petspot_db::Database;
use petspot_types::api::{ErrorCode, PhotoUploadResponse};

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;

/// 20 MB upload limit for photos
pub const MAX_PHOTO_SIZE: usize = 20 * 1024 * 1024;

/// Public URL prefix under which the image directory is served.
pub const PHOTO_URL_PREFIX: &str = "/images/";

/// Files younger than this are left alone by the sweep; they may belong to
/// an upload whose transaction has not committed yet.
const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageKind {
    pub mime: &'static str,
    pub extension: &'static str,
}

/// Identify a supported image from its leading bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    if let Some(kind) = sniff_heif(bytes) {
        return Some(kind);
    }

    let (mime, extension) = match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => ("image/jpeg", "jpg"),
        ImageFormat::Png => ("image/png", "png"),
        ImageFormat::Gif => ("image/gif", "gif"),
        ImageFormat::WebP => ("image/webp", "webp"),
        ImageFormat::Bmp => ("image/bmp", "bmp"),
        ImageFormat::Tiff => ("image/tiff", "tiff"),
        _ => return None,
    };
    Some(ImageKind { mime, extension })
}

/// HEIC/HEIF are ISO BMFF files: a `ftyp` box at offset 4 with the major
/// brand right after it.
fn sniff_heif(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return None;
    }
    match &bytes[8..12] {
        b"heic" | b"heix" | b"hevc" | b"hevx" | b"heim" | b"heis" => Some(ImageKind {
            mime: "image/heic",
            extension: "heic",
        }),
        b"mif1" | b"msf1" | b"heif" => Some(ImageKind {
            mime: "image/heif",
            extension: "heif",
        }),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows whose `photo_url` pointed at a missing file and was cleared.
    pub cleared_rows: usize,
    /// Files in the image directory no row referenced.
    pub removed_files: usize,
}

/// Stores announcement photos at `{image_dir}/{id}.{ext}` and keeps the
/// row's `photo_url` in step with the file.
pub struct PhotoUploadService {
    db: Arc<Database>,
    image_dir: PathBuf,
    sweep_grace: Duration,
}

impl PhotoUploadService {
    pub fn new(db: Arc<Database>, image_dir: PathBuf) -> Self {
        Self {
            db,
            image_dir,
            sweep_grace: DEFAULT_SWEEP_GRACE,
        }
    }

    pub fn with_sweep_grace(mut self, grace: Duration) -> Self {
        self.sweep_grace = grace;
        self
    }

    pub fn image_dir(&self) -> &FsPath {
        &self.image_dir
    }

    /// Validate `bytes` as an image and attach it to announcement `id`.
    /// Returns the new public photo URL.
    ///
    /// The row update and the file write share one transaction: a failed
    /// write rolls the row back, and a failed commit removes the file.
    pub async fn upload_photo(&self, id: &str, bytes: Bytes) -> Result<String, ApiError> {
        let db = self.db.clone();
        let lookup_id = id.to_string();
        let row = blocking(move || Ok(db.find_announcement(&lookup_id)?))
            .await?
            .ok_or(ApiError::NotFound("Announcement"))?;

        if bytes.len() > MAX_PHOTO_SIZE {
            return Err(ApiError::PayloadTooLarge {
                limit: MAX_PHOTO_SIZE,
            });
        }

        let kind = sniff_image(&bytes)
            .ok_or_else(|| ApiError::validation("photo", ErrorCode::InvalidFileFormat))?;

        let size = bytes.len();
        let filename = format!("{}.{}", row.id, kind.extension);
        let photo_url = format!("{}{}", PHOTO_URL_PREFIX, filename);
        let target = self.image_dir.join(&filename);
        let previous = row.photo_url;

        let db = self.db.clone();
        let dir = self.image_dir.clone();
        let url = photo_url.clone();
        let path = target.clone();
        let result = blocking(move || {
            let updated = db.with_tx(|tx| {
                if !Database::update_photo_url(tx, &row.id, &url)? {
                    return Ok(false);
                }
                write_file(&dir, &path, &bytes)?;
                Ok(true)
            })?;
            Ok(updated)
        })
        .await;

        match result {
            Ok(true) => {}
            Ok(false) => return Err(ApiError::NotFound("Announcement")),
            Err(e) => {
                // Same filename as before: the row still points at it, keep it.
                if previous.as_deref() != Some(photo_url.as_str()) {
                    tokio::fs::remove_file(&target).await.ok();
                }
                return Err(e);
            }
        }

        if let Some(old) = previous.filter(|old| old != &photo_url) {
            self.delete_photos(&old).await;
        }

        info!(
            "Photo {} stored for announcement {} ({} bytes, {})",
            photo_url, id, size, kind.mime
        );
        Ok(photo_url)
    }

    /// Remove the file behind a public photo URL. Never fails: a missing
    /// file or a permission problem is logged and ignored.
    pub async fn delete_photos(&self, photo_url: &str) {
        let Some(path) = photo_path(&self.image_dir, photo_url) else {
            warn!("Refusing to delete photo outside the image directory: {}", photo_url);
            return;
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Deleted photo {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Photo {} already gone", path.display());
            }
            Err(e) => warn!("Failed to delete photo {}: {}", path.display(), e),
        }
    }

    /// Reconcile rows and files: clear `photo_url` on rows whose file is
    /// missing and delete files no row references.
    pub async fn sweep(&self) -> Result<SweepReport, ApiError> {
        let db = self.db.clone();
        let dir = self.image_dir.clone();
        let grace = self.sweep_grace;
        blocking(move || Ok(sweep_blocking(&db, &dir, grace)?)).await
    }
}

/// Map `/images/{name}` back to a path inside `dir`. Anything that could
/// escape the directory yields `None`.
fn photo_path(dir: &FsPath, photo_url: &str) -> Option<PathBuf> {
    let name = photo_url.strip_prefix(PHOTO_URL_PREFIX)?;
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
    {
        return None;
    }
    Some(dir.join(name))
}

/// Write via a hidden temp file and rename, so a reader never sees a
/// half-written photo.
fn write_file(dir: &FsPath, target: &FsPath, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;

    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid photo path {}", target.display()))?;
    let tmp = dir.join(format!(".{}.tmp", name));

    if let Err(e) = std::fs::write(&tmp, bytes) {
        std::fs::remove_file(&tmp).ok();
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&tmp, target) {
        std::fs::remove_file(&tmp).ok();
        return Err(e.into());
    }
    Ok(())
}

fn sweep_blocking(db: &Database, dir: &FsPath, grace: Duration) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut referenced = HashSet::new();

    for (id, url) in db.find_photo_urls()? {
        match photo_path(dir, &url) {
            Some(path) if path.is_file() => {
                if let Some(name) = path.file_name() {
                    referenced.insert(name.to_os_string());
                }
            }
            _ => {
                if db.clear_photo_url(&id, &url)? {
                    warn!("Announcement {} referenced missing photo {}; cleared", id, url);
                    report.cleared_rows += 1;
                }
            }
        }
    }

    if !dir.is_dir() {
        return Ok(report);
    }

    let now = SystemTime::now();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() || referenced.contains(&entry.file_name()) {
            continue;
        }

        let old_enough = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= grace);
        if !old_enough {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!("Removed orphaned photo {}", entry.path().display());
                report.removed_files += 1;
            }
            Err(e) => warn!("Failed to remove orphaned photo {}: {}", entry.path().display(), e),
        }
    }

    Ok(report)
}

// -- Handlers --

/// POST /api/v1/announcements/{id}/photos. Raw image bytes, authenticated
/// with HTTP Basic `{announcement id}:{management password}`.
pub async fn upload_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let TypedHeader(Authorization(credentials)) = auth.ok_or(ApiError::Unauthenticated)?;

    // Look the announcement up before rejecting a mismatched username so an
    // unknown id is still reported as NotFound.
    state
        .announcements
        .verify_management_password(&id, credentials.password())
        .await?;
    if credentials.username() != id {
        return Err(ApiError::Unauthenticated);
    }

    let photo_url = state.photos.upload_photo(&id, body).await?;

    Ok((StatusCode::OK, Json(PhotoUploadResponse { photo_url })))
}
