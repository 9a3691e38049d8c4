use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::photos::PhotoUploadService;

/// Background task that reconciles photo rows with the image directory.
///
/// The row update and the file write of an upload cannot be made truly
/// atomic, so this runs on an interval and repairs whatever drifted: rows
/// pointing at missing files lose their `photo_url`, unreferenced files are
/// deleted.
pub async fn run_sweep_loop(photos: Arc<PhotoUploadService>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match photos.sweep().await {
            Ok(report) => {
                if report.cleared_rows > 0 || report.removed_files > 0 {
                    info!(
                        "Sweep: cleared {} dangling photo URLs, removed {} orphaned files",
                        report.cleared_rows, report.removed_files
                    );
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}
