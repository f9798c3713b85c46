// Cached score recomputation.
//
// Scores are never maintained incrementally. A vote write leaves every cached
// score stale until the caller runs, in order:
//   1. recompute_score(target)
//   2. recompute_profile_score(author of target)
// Nothing here chains step 2 onto step 1.
use rusqlite::{params, Connection};

use crate::qa::domain::{UserId, VoteTarget};
use crate::qa::error::{OptionalRow, QaResult};
use crate::qa::votes::require_target;

/// Sum every vote recorded against `target` and store it as the target's score.
///
/// A target with no vote rows scores 0.
pub fn recompute_score(conn: &Connection, target: &VoteTarget) -> QaResult<i64> {
    require_target(conn, target)?;

    let score: i64 = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(vote), 0) FROM {} WHERE {} = ?1",
            target.vote_table(),
            target.vote_column()
        ),
        params![target.id()],
        |row| row.get(0),
    )?;

    conn.execute(
        &format!(
            "UPDATE {} SET score = ?1 WHERE id = ?2",
            target.content_table()
        ),
        params![score, target.id()],
    )?;

    tracing::debug!("Recomputed score of {}: {}", target, score);
    Ok(score)
}

/// Recompute a profile's reputation from the cached scores of everything its
/// user authored. Each half of the sum defaults to 0 on its own.
pub fn recompute_profile_score(conn: &Connection, user: &UserId) -> QaResult<i64> {
    conn.query_row(
        "SELECT 1 FROM profiles WHERE user_id = ?1",
        params![user.as_str()],
        |_| Ok(()),
    )
    .or_not_found(|| format!("profile of user {user}"))?;

    let from_questions: i64 = conn.query_row(
        "SELECT COALESCE(SUM(score), 0) FROM questions WHERE author_id = ?1",
        params![user.as_str()],
        |row| row.get(0),
    )?;
    let from_answers: i64 = conn.query_row(
        "SELECT COALESCE(SUM(score), 0) FROM answers WHERE author_id = ?1",
        params![user.as_str()],
        |row| row.get(0),
    )?;
    let score = from_questions + from_answers;

    conn.execute(
        "UPDATE profiles SET score = ?1 WHERE user_id = ?2",
        params![score, user.as_str()],
    )?;

    tracing::debug!("Recomputed reputation of {}: {}", user, score);
    Ok(score)
}

/// Author of a vote target, `None` once the author account is gone.
pub fn author_of(conn: &Connection, target: &VoteTarget) -> QaResult<Option<UserId>> {
    let author: Option<String> = conn
        .query_row(
            &format!(
                "SELECT author_id FROM {} WHERE id = ?1",
                target.content_table()
            ),
            params![target.id()],
            |row| row.get(0),
        )
        .or_not_found(|| target.to_string())?;
    Ok(author.map(UserId::new))
}
