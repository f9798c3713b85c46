use askama::Template;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::session;
use crate::error::AppResult;
use crate::extractors::{extract_session_token_from_headers, MaybeUser};
use crate::qa::{content, NewUser, QaError, UserId};
use crate::routes::home::{Html, Layout};
use crate::routes::uploads::{self, MultipartForm, Upload};
use crate::state::AppState;
use crate::validation;

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub layout: Layout,
    pub errors: Vec<String>,
    pub username: String,
    pub next: String,
}

#[derive(Template)]
#[template(path = "pages/register.html")]
pub struct RegisterTemplate {
    pub layout: Layout,
    pub errors: Vec<String>,
    pub username: String,
    pub email: String,
    pub nickname: String,
}

#[derive(Deserialize, Default)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: String,
}

/// Text fields of the sign-up form; the avatar travels alongside as a file.
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub password: String,
    pub password2: String,
}

impl RegisterForm {
    fn from_multipart(form: &MultipartForm) -> Self {
        Self {
            username: form.text("username"),
            email: form.text("email"),
            nickname: form.text("nickname"),
            password: form.text("password"),
            password2: form.text("password2"),
        }
    }
}

struct Registration {
    username: String,
    email: String,
    nickname: String,
    avatar_ext: Option<String>,
}

/// Only follow same-site relative redirects.
fn safe_next(next: &str) -> String {
    if next.starts_with('/') && !next.starts_with("//") {
        next.to_string()
    } else {
        "/".to_string()
    }
}

fn session_cookie(state: &AppState, token: &str) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        state.config.auth.cookie_name,
        token,
        state.config.auth.session_hours * 3600
    )
}

fn signed_in(state: &AppState, user_id: &UserId, next: &str) -> AppResult<Response> {
    let conn = state.db.get()?;
    let token = session::create_session(&conn, user_id, state.config.auth.session_hours)?;
    Ok((
        [(header::SET_COOKIE, session_cookie(state, &token))],
        Redirect::to(&safe_next(next)),
    )
        .into_response())
}

pub async fn login_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<NextQuery>,
) -> AppResult<Response> {
    if user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let conn = state.db.get()?;
    Ok(Html(LoginTemplate {
        layout: Layout::load(&conn, &state.config, None)?,
        errors: Vec::new(),
        username: String::new(),
        next: query.next.unwrap_or_else(|| "/".to_string()),
    })
    .into_response())
}

pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> AppResult<Response> {
    let user = {
        let conn = state.db.get()?;
        match content::find_user_by_username(&conn, form.username.trim()) {
            Ok(user) => Some(user),
            Err(QaError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        }
    };

    match user {
        Some(user) if verify_password(&form.password, &user.password_hash) => {
            tracing::info!("User {} signed in", user.username);
            signed_in(&state, &user.id, &form.next)
        }
        _ => {
            tracing::warn!("Failed sign-in for {}", form.username.trim());
            let conn = state.db.get()?;
            let page = LoginTemplate {
                layout: Layout::load(&conn, &state.config, None)?,
                errors: vec!["Incorrect login or password".to_string()],
                username: form.username,
                next: form.next,
            };
            Ok((StatusCode::UNAUTHORIZED, Html(page)).into_response())
        }
    }
}

pub async fn register_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Response> {
    if user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let conn = state.db.get()?;
    Ok(Html(RegisterTemplate {
        layout: Layout::load(&conn, &state.config, None)?,
        errors: Vec::new(),
        username: String::new(),
        email: String::new(),
        nickname: String::new(),
    })
    .into_response())
}

fn check_registration(
    form: &RegisterForm,
    avatar: Option<&Upload>,
) -> Result<Registration, Vec<String>> {
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
    let avatar_ext = avatar.map(uploads::avatar_extension).transpose().unwrap_or_else(|e| {
        errors.push(e);
        None
    });
    if form.password.len() < 8 {
        errors.push("Password must be at least 8 characters".to_string());
    }
    if form.password != form.password2 {
        errors.push("Passwords do not match".to_string());
    }

    if errors.is_empty() {
        Ok(Registration {
            username,
            email,
            nickname,
            avatar_ext,
        })
    } else {
        Err(errors)
    }
}

fn rejected_registration(
    state: &AppState,
    form: RegisterForm,
    errors: Vec<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let page = RegisterTemplate {
        layout: Layout::load(&conn, &state.config, None)?,
        errors,
        username: form.username,
        email: form.email,
        nickname: form.nickname,
    };
    Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page)).into_response())
}

pub async fn register(State(state): State<AppState>, multipart: Multipart) -> AppResult<Response> {
    let mut multipart = MultipartForm::read(multipart).await?;
    let avatar = multipart.take_file("avatar");
    let form = RegisterForm::from_multipart(&multipart);

    let checked = match check_registration(&form, avatar.as_ref()) {
        Ok(checked) => checked,
        Err(errors) => return rejected_registration(&state, form, errors),
    };
    let password_hash = hash_password(&form.password, state.config.auth.bcrypt_cost)?;

    let uploads_dir = state.config.uploads_path();
    let avatar_path = match (&avatar, &checked.avatar_ext) {
        (Some(upload), Some(ext)) => Some(uploads::store_avatar(&uploads_dir, upload, ext).await?),
        _ => None,
    };

    let created = {
        let conn = state.db.get()?;
        content::register_user(
            &conn,
            &NewUser {
                username: &checked.username,
                email: Some(&checked.email),
                nickname: &checked.nickname,
                avatar_path: avatar_path.as_deref(),
                password_hash: &password_hash,
            },
            Utc::now(),
        )
    };

    match created {
        Ok(user) => signed_in(&state, &user.id, "/"),
        Err(e) => {
            if let Some(path) = &avatar_path {
                uploads::discard_avatar(&uploads_dir, path).await;
            }
            match e {
                QaError::Conflict(_) => rejected_registration(
                    &state,
                    form,
                    vec!["That username is already taken".to_string()],
                ),
                e => Err(e.into()),
            }
        }
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    if let Some(token) = extract_session_token_from_headers(&headers, &state.config.auth.cookie_name) {
        let conn = state.db.get()?;
        session::delete_session(&conn, token)?;
    }

    let expired = format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        state.config.auth.cookie_name
    );
    Ok(([(header::SET_COOKIE, expired)], Redirect::to("/")).into_response())
}
