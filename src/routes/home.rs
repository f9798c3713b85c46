use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rusqlite::Connection;

use crate::config::Config;
use crate::error::AppResult;
use crate::extractors::MaybeUser;
use crate::qa::{content, Profile, QaResult, QuestionListing, Tag, Window};
use crate::routes::pagination::{Page, PageQuery, PageSpan};
use crate::routes::tag_path;
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Data every page's header and sidebar needs.
pub struct Layout {
    pub username: Option<String>,
    pub tags: Vec<Tag>,
    pub best_members: Vec<Profile>,
}

impl Layout {
    pub fn load(conn: &Connection, config: &Config, username: Option<String>) -> AppResult<Self> {
        Ok(Self {
            username,
            tags: content::all_tags(conn)?,
            best_members: content::top_profiles(conn, config.listing.top_profiles)?,
        })
    }
}

#[derive(Template)]
#[template(path = "pages/questions.html")]
pub struct QuestionsTemplate {
    pub layout: Layout,
    pub heading: String,
    pub base_url: String,
    pub page: Page<QuestionListing>,
}

fn render_questions(
    state: &AppState,
    conn: &Connection,
    user: MaybeUser,
    heading: String,
    base_url: String,
    total: usize,
    query: &PageQuery,
    fetch: impl FnOnce(Window) -> QaResult<Vec<QuestionListing>>,
) -> AppResult<Html<QuestionsTemplate>> {
    let span = PageSpan::locate(
        total,
        state.config.listing.questions_per_page,
        query.page.unwrap_or(1),
    )?;
    let page = Page::from_span(fetch(span.window)?, span);
    let layout = Layout::load(conn, &state.config, user.0.map(|u| u.username))?;

    Ok(Html(QuestionsTemplate {
        layout,
        heading,
        base_url,
        page,
    }))
}

/// Newest questions first
pub async fn index(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<QuestionsTemplate>> {
    let conn = state.db.get()?;
    let total = content::count_questions(&conn)?;
    render_questions(
        &state,
        &conn,
        user,
        "New questions".to_string(),
        "/".to_string(),
        total,
        &query,
        |window| content::newest_window(&conn, window),
    )
}

/// Highest scored questions first
pub async fn hot(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<QuestionsTemplate>> {
    let conn = state.db.get()?;
    let total = content::count_questions(&conn)?;
    render_questions(
        &state,
        &conn,
        user,
        "Hot questions".to_string(),
        "/hot".to_string(),
        total,
        &query,
        |window| content::most_popular_window(&conn, window),
    )
}

/// Questions carrying one tag; 404 when there are none
pub async fn tagged(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(label): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<QuestionsTemplate>> {
    let conn = state.db.get()?;
    let total = content::count_tagged(&conn, &label)?;
    render_questions(
        &state,
        &conn,
        user,
        format!("Tag: {label}"),
        tag_path(&label),
        total,
        &query,
        |window| content::by_tag_window(&conn, &label, window),
    )
}
