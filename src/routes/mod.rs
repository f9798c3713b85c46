pub mod assets;
pub mod auth;
pub mod home;
pub mod pagination;
pub mod profile;
pub mod questions;
pub mod uploads;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Link to a tag's listing with the label escaped as one path segment.
pub(crate) fn tag_path(label: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(label.as_bytes()).collect();
    // byte_serialize writes spaces as '+' and a literal '+' as %2B
    format!("/tag/{}", encoded.replace('+', "%20"))
}

/// Every page and endpoint the site serves, minus middleware and state.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .route("/hot", get(home::hot))
        .route("/tag/{label}", get(home::tagged))
        .route("/assets/{*path}", get(assets::serve))
        .merge(questions::router())
        .merge(profile::router())
        .merge(auth::router())
}
