//! Upload routes

use axum::{extract::DefaultBodyLimit, routing::post, Router};

use crate::{handlers::upload::upload_handler, AppState};

/// Create upload routes
///
/// File bytes travel as a JSON number array, so the body limit is sized
/// from the file limit rather than left at axum's default.
pub fn routes(max_file_size: usize) -> Router<AppState> {
    Router::new()
        .route("/uploads", post(upload_handler))
        .layer(DefaultBodyLimit::max(json_body_limit(max_file_size)))
}

/// Largest JSON body needed for a file of `max_file_size` bytes
fn json_body_limit(max_file_size: usize) -> usize {
    // up to "255," per byte, plus room for the other fields
    max_file_size.saturating_mul(4).saturating_add(64 * 1024)
}
