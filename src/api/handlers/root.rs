use crate::GIT_COMMIT_HASH;
use axum::response::IntoResponse;

// axum handler for /
pub async fn root() -> impl IntoResponse {
    format!(
        "{} {} ({})\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        GIT_COMMIT_HASH.get(0..7).unwrap_or(GIT_COMMIT_HASH)
    )
}
