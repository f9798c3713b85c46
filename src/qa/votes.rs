// Vote records: one row per (user, target), created lazily, toggled in place
use rusqlite::{params, Connection};

use crate::qa::domain::{Direction, UserId, Vote, VoteRecord, VoteTarget};
use crate::qa::error::{OptionalRow, QaError, QaResult};

/// Fail with `NotFound` unless the target row exists.
pub(crate) fn require_target(conn: &Connection, target: &VoteTarget) -> QaResult<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", target.content_table());
    conn.query_row(&sql, params![target.id()], |_| Ok(()))
        .or_not_found(|| target.to_string())
}

pub(crate) fn require_user(conn: &Connection, user: &UserId) -> QaResult<()> {
    conn.query_row(
        "SELECT 1 FROM users WHERE id = ?1",
        params![user.as_str()],
        |_| Ok(()),
    )
    .or_not_found(|| format!("user {user}"))
}

fn read_vote(raw: i64) -> QaResult<Vote> {
    Vote::from_value(raw).ok_or_else(|| QaError::Corrupt(format!("vote value {raw}")))
}

/// Load the user's vote on `target`, inserting an `Unvoted` record first if
/// there is none yet.
pub fn find_or_create(conn: &Connection, target: &VoteTarget, user: &UserId) -> QaResult<VoteRecord> {
    require_target(conn, target)?;
    require_user(conn, user)?;

    let table = target.vote_table();
    let column = target.vote_column();

    conn.execute(
        &format!(
            "INSERT INTO {table} (user_id, {column}, vote) VALUES (?1, ?2, 0)
             ON CONFLICT(user_id, {column}) DO NOTHING"
        ),
        params![user.as_str(), target.id()],
    )?;

    let raw: i64 = conn.query_row(
        &format!("SELECT vote FROM {table} WHERE user_id = ?1 AND {column} = ?2"),
        params![user.as_str(), target.id()],
        |row| row.get(0),
    )?;

    Ok(VoteRecord {
        target: target.clone(),
        user_id: user.clone(),
        vote: read_vote(raw)?,
    })
}

/// The user's stored vote, `Unvoted` when they never voted.
pub fn current_vote(conn: &Connection, target: &VoteTarget, user: &UserId) -> QaResult<Vote> {
    let table = target.vote_table();
    let column = target.vote_column();

    let result = conn.query_row(
        &format!("SELECT vote FROM {table} WHERE user_id = ?1 AND {column} = ?2"),
        params![user.as_str(), target.id()],
        |row| row.get::<_, i64>(0),
    );

    match result {
        Ok(raw) => read_vote(raw),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Vote::Unvoted),
        Err(e) => Err(e.into()),
    }
}

/// Toggle the user's vote on `target` and persist it. Returns the new value.
///
/// Does not touch any cached score; callers follow up with
/// [`crate::qa::scores::recompute_score`] and
/// [`crate::qa::scores::recompute_profile_score`].
pub fn like_or_dislike(
    conn: &Connection,
    target: &VoteTarget,
    user: &UserId,
    direction: Direction,
) -> QaResult<Vote> {
    let mut record = find_or_create(conn, target, user)?;
    let previous = record.vote;
    record.vote = previous.toggle(direction);

    conn.execute(
        &format!(
            "UPDATE {} SET vote = ?1 WHERE user_id = ?2 AND {} = ?3",
            target.vote_table(),
            target.vote_column()
        ),
        params![record.vote.value(), user.as_str(), target.id()],
    )?;

    tracing::debug!(
        "Vote on {} by {}: {:?} -> {:?}",
        target,
        user,
        previous,
        record.vote
    );

    Ok(record.vote)
}
