use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, MaybeUser};
use crate::qa::{
    content, scores, votes, AnswerId, AnswerListing, Direction, NewQuestion, QuestionId,
    QuestionListing, UserId, Vote, VoteTarget,
};
use crate::routes::home::{Html, Layout};
use crate::routes::pagination::{Page, PageQuery};
use crate::state::AppState;
use crate::validation;

// --- View structs ---

/// Score plus the viewer's own vote, as shown next to a question or answer.
pub struct VoteBar {
    pub kind: &'static str,
    pub target_id: String,
    pub score: i64,
    pub liked: bool,
    pub disliked: bool,
    pub can_vote: bool,
}

impl VoteBar {
    fn new(target: &VoteTarget, score: i64, vote: Vote, can_vote: bool) -> Self {
        Self {
            kind: target.kind(),
            target_id: target.id().to_string(),
            score,
            liked: vote == Vote::Like,
            disliked: vote == Vote::Dislike,
            can_vote,
        }
    }
}

pub struct AnswerView {
    pub listing: AnswerListing,
    pub votes: VoteBar,
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/question.html")]
pub struct QuestionTemplate {
    pub layout: Layout,
    pub listing: QuestionListing,
    pub votes: VoteBar,
    pub answers: Page<AnswerView>,
    pub can_accept: bool,
    pub draft: AnswerDraft,
}

#[derive(Template)]
#[template(path = "pages/ask.html")]
pub struct AskTemplate {
    pub layout: Layout,
    pub errors: Vec<String>,
    pub title: String,
    pub text: String,
    pub tags: String,
}

#[derive(Template)]
#[template(path = "components/vote_bar.html")]
pub struct VoteBarTemplate {
    pub votes: VoteBar,
}

// --- Forms ---

#[derive(Deserialize)]
pub struct AskForm {
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub tags: String,
}

#[derive(Deserialize)]
pub struct AnswerForm {
    pub text: String,
}

#[derive(Deserialize)]
pub struct VoteForm {
    pub direction: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ask", get(ask_page).post(ask))
        .route("/questions/{id}", get(question_page))
        .route("/questions/{id}/answers", post(answer))
        .route("/questions/{id}/vote", post(vote_question))
        .route("/answers/{id}/vote", post(vote_answer))
        .route("/answers/{id}/correct", post(toggle_correct))
}

// --- Handlers ---

async fn question_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<QuestionTemplate>> {
    let conn = state.db.get()?;
    render_question(
        &state,
        &conn,
        user,
        &QuestionId::new(id),
        query.page.unwrap_or(1),
        AnswerDraft::default(),
    )
}

/// The answer form's state when it is shown again after a failed submit.
#[derive(Default)]
pub struct AnswerDraft {
    pub errors: Vec<String>,
    pub text: String,
}

fn render_question(
    state: &AppState,
    conn: &Connection,
    user: Option<CurrentUser>,
    id: &QuestionId,
    page: usize,
    draft: AnswerDraft,
) -> AppResult<Html<QuestionTemplate>> {
    let viewer = user.as_ref().map(|u| u.id.clone());

    let listing = content::question_listing(conn, id)?;
    let question_target = VoteTarget::Question(id.clone());
    let votes = VoteBar::new(
        &question_target,
        listing.question.score,
        viewer_vote(conn, &question_target, viewer.as_ref())?,
        viewer.is_some(),
    );

    // Viewer votes are only looked up for the answers on this page
    let answers = Page::paginate(
        content::answers_for_question(conn, id)?,
        state.config.listing.answers_per_page,
        page,
    )?
    .map(|answer| {
        let target = VoteTarget::Answer(answer.answer.id.clone());
        let vote = viewer_vote(conn, &target, viewer.as_ref())?;
        Ok(AnswerView {
            votes: VoteBar::new(&target, answer.answer.score, vote, viewer.is_some()),
            listing: answer,
        })
    })?;

    let can_accept = viewer.is_some() && viewer == listing.question.author_id;
    let layout = Layout::load(conn, &state.config, user.map(|u| u.username))?;

    Ok(Html(QuestionTemplate {
        layout,
        listing,
        votes,
        answers,
        can_accept,
        draft,
    }))
}

fn viewer_vote(conn: &Connection, target: &VoteTarget, viewer: Option<&UserId>) -> AppResult<Vote> {
    match viewer {
        Some(user) => Ok(votes::current_vote(conn, target, user)?),
        None => Ok(Vote::Unvoted),
    }
}

async fn ask_page(State(state): State<AppState>, user: CurrentUser) -> AppResult<Html<AskTemplate>> {
    let conn = state.db.get()?;
    Ok(Html(AskTemplate {
        layout: Layout::load(&conn, &state.config, Some(user.username))?,
        errors: Vec::new(),
        title: String::new(),
        text: String::new(),
        tags: String::new(),
    }))
}

async fn ask(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<AskForm>,
) -> AppResult<Response> {
    let title = validation::check_title(&form.title);
    let text = validation::check_text(&form.text);
    let tags = validation::check_tags(&form.tags);

    let conn = state.db.get()?;
    let input = match (title, text, tags) {
        (Ok(title), Ok(text), Ok(tags)) => NewQuestion { title, text, tags },
        (title, text, tags) => {
            let errors = [title.err(), text.err(), tags.err()]
                .into_iter()
                .flatten()
                .collect();
            let page = AskTemplate {
                layout: Layout::load(&conn, &state.config, Some(user.username))?,
                errors,
                title: form.title,
                text: form.text,
                tags: form.tags,
            };
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page)).into_response());
        }
    };

    let question = content::create_question(&conn, &user.id, &input, Utc::now())?;
    Ok(Redirect::to(&format!("/questions/{}", question.id)).into_response())
}

async fn answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<AnswerForm>,
) -> AppResult<Response> {
    let question = QuestionId::new(id);
    let conn = state.db.get()?;

    let text = match validation::check_text(&form.text) {
        Ok(text) => text,
        Err(message) => {
            let draft = AnswerDraft {
                errors: vec![message],
                text: form.text,
            };
            let page = render_question(&state, &conn, Some(user), &question, 1, draft)?;
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response());
        }
    };

    let answer = content::create_answer(&conn, &user.id, &question, &text, Utc::now())?;
    Ok(Redirect::to(&format!("/questions/{}#answer-{}", question, answer.id)).into_response())
}

/// Toggle a vote and refresh the cached scores, in one transaction:
/// vote record, then the target's score, then its author's reputation.
fn vote_and_recompute(
    state: &AppState,
    user: &CurrentUser,
    target: &VoteTarget,
    direction: Direction,
) -> AppResult<VoteBar> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let vote = votes::like_or_dislike(&tx, target, &user.id, direction)?;
    let score = scores::recompute_score(&tx, target)?;
    if let Some(author) = scores::author_of(&tx, target)? {
        scores::recompute_profile_score(&tx, &author)?;
    }

    tx.commit()?;
    Ok(VoteBar::new(target, score, vote, true))
}

fn parse_direction(form: &VoteForm) -> AppResult<Direction> {
    form.direction.parse().map_err(AppError::BadRequest)
}

async fn vote_question(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<VoteForm>,
) -> AppResult<Html<VoteBarTemplate>> {
    let direction = parse_direction(&form)?;
    let target = VoteTarget::Question(QuestionId::new(id));
    let votes = vote_and_recompute(&state, &user, &target, direction)?;
    Ok(Html(VoteBarTemplate { votes }))
}

async fn vote_answer(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<VoteForm>,
) -> AppResult<Html<VoteBarTemplate>> {
    let direction = parse_direction(&form)?;
    let target = VoteTarget::Answer(AnswerId::new(id));
    let votes = vote_and_recompute(&state, &user, &target, direction)?;
    Ok(Html(VoteBarTemplate { votes }))
}

/// Only the question's author may accept or un-accept an answer.
async fn toggle_correct(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let answer = content::find_answer(&conn, &AnswerId::new(id))?;
    let question = content::find_question(&conn, &answer.question_id)?;

    if question.author_id.as_ref() != Some(&user.id) {
        return Err(AppError::Forbidden);
    }

    content::mark_correct(&conn, &answer.id, !answer.is_correct, Utc::now())?;
    Ok(Redirect::to(&format!("/questions/{}", question.id)).into_response())
}
