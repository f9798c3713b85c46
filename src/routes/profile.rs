use askama::Template;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::qa::{content, QaError};
use crate::routes::assets::file_response;
use crate::routes::home::{Html, Layout};
use crate::routes::uploads::{self, MultipartForm};
use crate::state::AppState;
use crate::validation;

#[derive(Template)]
#[template(path = "pages/settings.html")]
pub struct SettingsTemplate {
    pub layout: Layout,
    pub errors: Vec<String>,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub avatar_path: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(settings_page).post(save_settings))
        .route("/media/{*path}", get(serve_media))
}

async fn settings_page(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Html<SettingsTemplate>> {
    let conn = state.db.get()?;
    let account = content::find_user(&conn, &user.id)?;
    let profile = content::find_profile(&conn, &user.id)?;

    Ok(Html(SettingsTemplate {
        layout: Layout::load(&conn, &state.config, Some(user.username))?,
        errors: Vec::new(),
        username: account.username,
        email: account.email.unwrap_or_default(),
        nickname: profile.nickname,
        avatar_path: profile.avatar_path,
    }))
}

struct SettingsForm {
    username: String,
    email: String,
    nickname: String,
}

fn rejected_settings(
    state: &AppState,
    user: &CurrentUser,
    form: SettingsForm,
    errors: Vec<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let profile = content::find_profile(&conn, &user.id)?;
    let page = SettingsTemplate {
        layout: Layout::load(&conn, &state.config, Some(user.username.clone()))?,
        errors,
        username: form.username,
        email: form.email,
        nickname: form.nickname,
        avatar_path: profile.avatar_path,
    };
    Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page)).into_response())
}

/// Account and profile changes are written together or not at all.
fn save_account(
    state: &AppState,
    user: &CurrentUser,
    username: &str,
    email: &str,
    nickname: &str,
    avatar_path: Option<&str>,
) -> Result<(), QaError> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;
    content::update_account(&tx, &user.id, username, Some(email))?;
    content::update_profile(&tx, &user.id, nickname, avatar_path)?;
    tx.commit()?;
    Ok(())
}

async fn save_settings(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<Response> {
    let mut multipart = MultipartForm::read(multipart).await?;
    let avatar = multipart.take_file("avatar");
    let form = SettingsForm {
        username: multipart.text("username"),
        email: multipart.text("email"),
        nickname: multipart.text("nickname"),
    };

    let mut errors = Vec::new();
    let mut keep = |checked: Result<String, String>| {
        checked.unwrap_or_else(|e| {
            errors.push(e);
            String::new()
        })
    };
    let username = keep(validation::check_username(&form.username));
    let email = keep(validation::check_email(&form.email));
    let nickname = keep(validation::check_nickname(&form.nickname));
    let avatar_ext = avatar
        .as_ref()
        .map(uploads::avatar_extension)
        .transpose()
        .unwrap_or_else(|e| {
            errors.push(e);
            None
        });
    if !errors.is_empty() {
        return rejected_settings(&state, &user, form, errors);
    }

    let uploads_dir = state.config.uploads_path();
    let avatar_path = match (&avatar, &avatar_ext) {
        (Some(upload), Some(ext)) => {
            let stored = uploads::store_avatar(&uploads_dir, upload, ext).await?;
            tracing::info!("Stored avatar for {} at {}", user.id, stored);
            Some(stored)
        }
        _ => None,
    };

    let saved = save_account(
        &state,
        &user,
        &username,
        &email,
        &nickname,
        avatar_path.as_deref(),
    );
    match saved {
        Ok(()) => Ok(Redirect::to("/settings").into_response()),
        Err(e) => {
            if let Some(path) = &avatar_path {
                uploads::discard_avatar(&uploads_dir, path).await;
            }
            match e {
                QaError::Conflict(_) => rejected_settings(
                    &state,
                    &user,
                    form,
                    vec!["That username is already taken".to_string()],
                ),
                e => Err(e.into()),
            }
        }
    }
}

/// Serve stored uploads. Paths must stay inside the storage directory.
async fn serve_media(State(state): State<AppState>, Path(path): Path<String>) -> AppResult<Response> {
    if path.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(AppError::NotFound);
    }

    let full = state.config.uploads_path().join(&path);
    let bytes = match tokio::fs::read(&full).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AppError::NotFound),
        Err(e) => return Err(AppError::Internal(e.to_string())),
    };

    Ok(file_response(&path, bytes))
}
