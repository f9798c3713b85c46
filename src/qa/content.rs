// Content repository - CRUD and ordered retrieval over users, profiles,
// questions, answers and tags.
//
// Every function takes a plain connection so callers decide the transaction
// boundary. Multi-statement writes run inside a SAVEPOINT, which nests
// cleanly under a caller's transaction.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use crate::qa::domain::{
    format_timestamp, parse_timestamp, Answer, AnswerId, AnswerListing, AuthorRef, NewQuestion,
    NewUser, Profile, Question, QuestionId, QuestionListing, Tag, User, UserId, Window,
};
use crate::qa::error::{conflict_on_constraint, OptionalRow, QaError, QaResult};

fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce() -> QaResult<T>,
) -> QaResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match body() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
            Err(e)
        }
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// --- Users & profiles ---

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::new(row.get::<_, String>(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        user_id: UserId::new(row.get::<_, String>(0)?),
        nickname: row.get(1)?,
        avatar_path: row.get(2)?,
        score: row.get(3)?,
    })
}

/// Create a user together with its profile. The nickname starts out as the
/// username.
pub fn create_user(
    conn: &Connection,
    username: &str,
    email: Option<&str>,
    password_hash: &str,
    now: DateTime<Utc>,
) -> QaResult<User> {
    register_user(
        conn,
        &NewUser {
            username,
            email,
            nickname: username,
            avatar_path: None,
            password_hash,
        },
        now,
    )
}

/// Create a user and its fully populated profile in one savepoint, so a
/// failure leaves neither behind.
pub fn register_user(conn: &Connection, input: &NewUser<'_>, now: DateTime<Utc>) -> QaResult<User> {
    let user = User {
        id: UserId::generate(),
        username: input.username.to_string(),
        email: input.email.map(str::to_string),
        password_hash: input.password_hash.to_string(),
        created_at: now,
    };

    with_savepoint(conn, "create_user", || {
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.as_str(),
                user.username,
                user.email,
                user.password_hash,
                format_timestamp(now)
            ],
        )
        .map_err(|e| conflict_on_constraint(e, || format!("username {} is taken", input.username)))?;

        conn.execute(
            "INSERT INTO profiles (user_id, nickname, avatar_path) VALUES (?1, ?2, ?3)",
            params![user.id.as_str(), input.nickname, input.avatar_path],
        )?;
        Ok(())
    })?;

    tracing::info!("Created user {} ({})", user.username, user.id);
    Ok(user)
}

pub fn find_user(conn: &Connection, id: &UserId) -> QaResult<User> {
    conn.query_row(
        "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?1",
        params![id.as_str()],
        user_from_row,
    )
    .or_not_found(|| format!("user {id}"))
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> QaResult<User> {
    conn.query_row(
        "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?1",
        params![username],
        user_from_row,
    )
    .or_not_found(|| format!("user {username}"))
}

/// Delete a user. Their questions, answers and votes stay, with the author
/// reference cleared; the profile and sessions go with the user.
pub fn delete_user(conn: &Connection, id: &UserId) -> QaResult<()> {
    let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id.as_str()])?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("user {id}")));
    }
    tracing::info!("Deleted user {}", id);
    Ok(())
}

/// Change the login name and email. A username held by someone else is a
/// `Conflict`.
pub fn update_account(
    conn: &Connection,
    id: &UserId,
    username: &str,
    email: Option<&str>,
) -> QaResult<User> {
    let rows = conn
        .execute(
            "UPDATE users SET username = ?1, email = ?2 WHERE id = ?3",
            params![username, email, id.as_str()],
        )
        .map_err(|e| conflict_on_constraint(e, || format!("username {username} is taken")))?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("user {id}")));
    }
    find_user(conn, id)
}

pub fn find_profile(conn: &Connection, user: &UserId) -> QaResult<Profile> {
    conn.query_row(
        "SELECT user_id, nickname, avatar_path, score FROM profiles WHERE user_id = ?1",
        params![user.as_str()],
        profile_from_row,
    )
    .or_not_found(|| format!("profile of user {user}"))
}

/// Change the nickname, and the avatar when a new one is given.
pub fn update_profile(
    conn: &Connection,
    user: &UserId,
    nickname: &str,
    avatar_path: Option<&str>,
) -> QaResult<Profile> {
    let rows = conn.execute(
        "UPDATE profiles SET nickname = ?1, avatar_path = COALESCE(?2, avatar_path)
         WHERE user_id = ?3",
        params![nickname, avatar_path, user.as_str()],
    )?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("profile of user {user}")));
    }
    find_profile(conn, user)
}

/// Highest reputation first; equal scores fall back to nickname, then user id.
pub fn top_profiles(conn: &Connection, limit: usize) -> QaResult<Vec<Profile>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT user_id, nickname, avatar_path, score FROM profiles
         ORDER BY score DESC, nickname ASC, user_id ASC
         LIMIT ?1",
    )?;
    let profiles = stmt
        .query_map(params![limit], profile_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(profiles)
}

// --- Tags ---

/// Reuse the tag whose label matches case-insensitively, or create it.
pub fn find_or_create_tag(conn: &Connection, label: &str) -> QaResult<Tag> {
    let label = label.trim();
    let existing = conn.query_row(
        "SELECT id, label FROM tags WHERE label = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
        params![label],
        |row| {
            Ok(Tag {
                id: row.get(0)?,
                label: row.get(1)?,
            })
        },
    );

    match existing {
        Ok(tag) => Ok(tag),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            conn.execute("INSERT INTO tags (label) VALUES (?1)", params![label])?;
            Ok(Tag {
                id: conn.last_insert_rowid(),
                label: label.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub fn all_tags(conn: &Connection) -> QaResult<Vec<Tag>> {
    let mut stmt = conn.prepare("SELECT id, label FROM tags ORDER BY label ASC")?;
    let tags = stmt
        .query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                label: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

// --- Questions ---

const QUESTION_COLUMNS: &str =
    "q.id, q.author_id, q.title, q.text, q.score, q.created_at, q.last_modified";

const LISTING_SELECT: &str = "SELECT q.id, q.author_id, q.title, q.text, q.score, q.created_at, q.last_modified,
        p.nickname, p.avatar_path,
        (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id)
 FROM questions q
 LEFT JOIN profiles p ON p.user_id = q.author_id";

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: QuestionId::new(row.get::<_, String>(0)?),
        author_id: row.get::<_, Option<String>>(1)?.map(UserId::new),
        title: row.get(2)?,
        text: row.get(3)?,
        score: row.get(4)?,
        created_at: timestamp(row, 5)?,
        last_modified: timestamp(row, 6)?,
    })
}

/// Author columns start at `offset`: nickname, avatar_path.
fn author_from_row(
    row: &Row<'_>,
    author_id: Option<&UserId>,
    offset: usize,
) -> rusqlite::Result<Option<AuthorRef>> {
    let nickname: Option<String> = row.get(offset)?;
    Ok(match (author_id, nickname) {
        (Some(user_id), Some(nickname)) => Some(AuthorRef {
            user_id: user_id.clone(),
            nickname,
            avatar_path: row.get(offset + 1)?,
        }),
        _ => None,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<QuestionListing> {
    let question = question_from_row(row)?;
    let author = author_from_row(row, question.author_id.as_ref(), 7)?;
    Ok(QuestionListing {
        question,
        author,
        tags: Vec::new(),
        answer_count: row.get(9)?,
    })
}

fn query_listings(
    conn: &Connection,
    filter_and_order: &str,
    args: impl rusqlite::Params,
) -> QaResult<Vec<QuestionListing>> {
    let mut stmt = conn.prepare(&format!("{LISTING_SELECT} {filter_and_order}"))?;
    let mut listings = stmt
        .query_map(args, listing_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    attach_listing_tags(conn, &mut listings)?;
    Ok(listings)
}

/// Fill in tags for every listing with a single query.
fn attach_listing_tags(conn: &Connection, listings: &mut [QuestionListing]) -> QaResult<()> {
    if listings.is_empty() {
        return Ok(());
    }

    let placeholders = vec!["?"; listings.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT qt.question_id, t.label FROM question_tags qt
         JOIN tags t ON t.id = qt.tag_id
         WHERE qt.question_id IN ({placeholders})
         ORDER BY t.label ASC"
    ))?;
    let ids = listings.iter().map(|l| l.question.id.as_str());
    let mut by_question: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(rusqlite::params_from_iter(ids), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (question, label) = row?;
        by_question.entry(question).or_default().push(label);
    }

    for listing in listings.iter_mut() {
        listing.tags = by_question
            .remove(listing.question.id.as_str())
            .unwrap_or_default();
    }
    Ok(())
}

fn attach_tags(conn: &Connection, question: &QuestionId, labels: &[String]) -> QaResult<()> {
    for label in labels {
        let tag = find_or_create_tag(conn, label)?;
        conn.execute(
            "INSERT OR IGNORE INTO question_tags (question_id, tag_id) VALUES (?1, ?2)",
            params![question.as_str(), tag.id],
        )?;
    }
    Ok(())
}

pub fn create_question(
    conn: &Connection,
    author: &UserId,
    input: &NewQuestion,
    now: DateTime<Utc>,
) -> QaResult<Question> {
    let question = Question {
        id: QuestionId::generate(),
        author_id: Some(author.clone()),
        title: input.title.clone(),
        text: input.text.clone(),
        score: 0,
        created_at: now,
        last_modified: now,
    };

    with_savepoint(conn, "create_question", || {
        crate::qa::votes::require_user(conn, author)?;
        let stamp = format_timestamp(now);
        conn.execute(
            "INSERT INTO questions (id, author_id, title, text, score, created_at, last_modified)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![question.id.as_str(), author.as_str(), question.title, question.text, stamp],
        )?;
        attach_tags(conn, &question.id, &input.tags)
    })?;

    tracing::info!("Question {} asked by {}", question.id, author);
    Ok(question)
}

pub fn find_question(conn: &Connection, id: &QuestionId) -> QaResult<Question> {
    conn.query_row(
        &format!("SELECT {QUESTION_COLUMNS} FROM questions q WHERE q.id = ?1"),
        params![id.as_str()],
        question_from_row,
    )
    .or_not_found(|| format!("question {id}"))
}

/// A single question with its author, tags and answer count.
pub fn question_listing(conn: &Connection, id: &QuestionId) -> QaResult<QuestionListing> {
    let mut listings = query_listings(conn, "WHERE q.id = ?1", params![id.as_str()])?;
    listings
        .pop()
        .ok_or_else(|| QaError::NotFound(format!("question {id}")))
}

pub fn edit_question(
    conn: &Connection,
    id: &QuestionId,
    title: &str,
    text: &str,
    now: DateTime<Utc>,
) -> QaResult<Question> {
    let rows = conn.execute(
        "UPDATE questions SET title = ?1, text = ?2, last_modified = ?3 WHERE id = ?4",
        params![title, text, format_timestamp(now), id.as_str()],
    )?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("question {id}")));
    }
    find_question(conn, id)
}

/// Delete a question; its answers, tag links and every vote on either go too.
pub fn delete_question(conn: &Connection, id: &QuestionId) -> QaResult<()> {
    let rows = conn.execute("DELETE FROM questions WHERE id = ?1", params![id.as_str()])?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("question {id}")));
    }
    tracing::info!("Deleted question {}", id);
    Ok(())
}

const NEWEST_ORDER: &str = "ORDER BY q.created_at DESC, q.id DESC";
const POPULAR_ORDER: &str = "ORDER BY q.score DESC, q.created_at DESC, q.id DESC";
const TAGGED_FILTER: &str = "WHERE q.id IN (
         SELECT qt.question_id FROM question_tags qt
         JOIN tags t ON t.id = qt.tag_id
         WHERE t.label = ?1 COLLATE NOCASE
     )";

/// All questions, most recent first (ties: higher id first).
pub fn newest(conn: &Connection) -> QaResult<Vec<QuestionListing>> {
    query_listings(conn, NEWEST_ORDER, params![])
}

/// One window of [`newest`].
pub fn newest_window(conn: &Connection, window: Window) -> QaResult<Vec<QuestionListing>> {
    let (limit, offset) = window.sql_args();
    query_listings(
        conn,
        &format!("{NEWEST_ORDER} LIMIT ?1 OFFSET ?2"),
        params![limit, offset],
    )
}

/// All questions by cached score, highest first. Equal scores are ordered
/// newest first, then by id descending, so the order is total.
pub fn most_popular(conn: &Connection) -> QaResult<Vec<QuestionListing>> {
    query_listings(conn, POPULAR_ORDER, params![])
}

/// One window of [`most_popular`].
pub fn most_popular_window(conn: &Connection, window: Window) -> QaResult<Vec<QuestionListing>> {
    let (limit, offset) = window.sql_args();
    query_listings(
        conn,
        &format!("{POPULAR_ORDER} LIMIT ?1 OFFSET ?2"),
        params![limit, offset],
    )
}

pub fn count_questions(conn: &Connection) -> QaResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Questions carrying `label` (ASCII case-insensitive), newest first.
/// An empty result is `NotFound`.
pub fn by_tag(conn: &Connection, label: &str) -> QaResult<Vec<QuestionListing>> {
    let listings = query_listings(
        conn,
        &format!("{TAGGED_FILTER} {NEWEST_ORDER}"),
        params![label.trim()],
    )?;

    if listings.is_empty() {
        return Err(QaError::NotFound(format!("questions tagged {label}")));
    }
    Ok(listings)
}

/// How many questions carry `label`; zero is `NotFound`, as for [`by_tag`].
pub fn count_tagged(conn: &Connection, label: &str) -> QaResult<usize> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM questions q {TAGGED_FILTER}"),
        params![label.trim()],
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(QaError::NotFound(format!("questions tagged {label}")));
    }
    Ok(usize::try_from(count).unwrap_or(0))
}

/// One window of [`by_tag`]. A window past the end is simply empty.
pub fn by_tag_window(
    conn: &Connection,
    label: &str,
    window: Window,
) -> QaResult<Vec<QuestionListing>> {
    let (limit, offset) = window.sql_args();
    query_listings(
        conn,
        &format!("{TAGGED_FILTER} {NEWEST_ORDER} LIMIT ?2 OFFSET ?3"),
        params![label.trim(), limit, offset],
    )
}

// --- Answers ---

const ANSWER_COLUMNS: &str =
    "a.id, a.question_id, a.author_id, a.text, a.is_correct, a.score, a.created_at, a.last_modified";

fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: AnswerId::new(row.get::<_, String>(0)?),
        question_id: QuestionId::new(row.get::<_, String>(1)?),
        author_id: row.get::<_, Option<String>>(2)?.map(UserId::new),
        text: row.get(3)?,
        is_correct: row.get(4)?,
        score: row.get(5)?,
        created_at: timestamp(row, 6)?,
        last_modified: timestamp(row, 7)?,
    })
}

pub fn create_answer(
    conn: &Connection,
    author: &UserId,
    question: &QuestionId,
    text: &str,
    now: DateTime<Utc>,
) -> QaResult<Answer> {
    find_question(conn, question)?;
    crate::qa::votes::require_user(conn, author)?;

    let answer = Answer {
        id: AnswerId::generate(),
        question_id: question.clone(),
        author_id: Some(author.clone()),
        text: text.to_string(),
        is_correct: false,
        score: 0,
        created_at: now,
        last_modified: now,
    };

    conn.execute(
        "INSERT INTO answers (id, question_id, author_id, text, is_correct, score, created_at, last_modified)
         VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?5)",
        params![
            answer.id.as_str(),
            question.as_str(),
            author.as_str(),
            answer.text,
            format_timestamp(now)
        ],
    )?;

    tracing::info!("Answer {} posted on question {}", answer.id, question);
    Ok(answer)
}

pub fn find_answer(conn: &Connection, id: &AnswerId) -> QaResult<Answer> {
    conn.query_row(
        &format!("SELECT {ANSWER_COLUMNS} FROM answers a WHERE a.id = ?1"),
        params![id.as_str()],
        answer_from_row,
    )
    .or_not_found(|| format!("answer {id}"))
}

/// Answers to `question`: accepted answers first whatever their score, then
/// by score descending, then oldest first.
pub fn answers_for_question(
    conn: &Connection,
    question: &QuestionId,
) -> QaResult<Vec<AnswerListing>> {
    find_question(conn, question)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ANSWER_COLUMNS}, p.nickname, p.avatar_path
         FROM answers a
         LEFT JOIN profiles p ON p.user_id = a.author_id
         WHERE a.question_id = ?1
         ORDER BY a.is_correct DESC, a.score DESC, a.created_at ASC, a.id ASC"
    ))?;

    let answers = stmt
        .query_map(params![question.as_str()], |row| {
            let answer = answer_from_row(row)?;
            let author = author_from_row(row, answer.author_id.as_ref(), 8)?;
            Ok(AnswerListing { answer, author })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(answers)
}

pub fn mark_correct(
    conn: &Connection,
    id: &AnswerId,
    is_correct: bool,
    now: DateTime<Utc>,
) -> QaResult<Answer> {
    let rows = conn.execute(
        "UPDATE answers SET is_correct = ?1, last_modified = ?2 WHERE id = ?3",
        params![is_correct, format_timestamp(now), id.as_str()],
    )?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("answer {id}")));
    }
    find_answer(conn, id)
}

pub fn delete_answer(conn: &Connection, id: &AnswerId) -> QaResult<()> {
    let rows = conn.execute("DELETE FROM answers WHERE id = ?1", params![id.as_str()])?;
    if rows == 0 {
        return Err(QaError::NotFound(format!("answer {id}")));
    }
    Ok(())
}
