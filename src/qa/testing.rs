// Shared fixtures for the qa unit tests
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::db;
use crate::qa::content;
use crate::qa::domain::{AnswerId, NewQuestion, QuestionId, UserId};
use crate::state::DbPool;

/// Fixed clock: 2026-01-01T00:00:00Z plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
}

/// Alice asked a tagged question, Bob answered it. Nobody has voted.
pub struct Fixture {
    pub pool: DbPool,
    pub alice: UserId,
    pub bob: UserId,
    pub question: QuestionId,
    pub answer: AnswerId,
    _dir: TempDir,
}

pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let pool = db::create_pool(&dir.path().join("test.db")).unwrap();
    db::run_migrations(&pool).unwrap();

    let conn = pool.get().unwrap();
    let alice = content::create_user(&conn, "alice", None, "hash", at(0)).unwrap();
    let bob = content::create_user(&conn, "bob", None, "hash", at(0)).unwrap();
    let question = content::create_question(
        &conn,
        &alice.id,
        &NewQuestion {
            title: "Why does recursion terminate".to_string(),
            text: "My function keeps calling itself".to_string(),
            tags: vec!["python".to_string(), "algorithms".to_string()],
        },
        at(1),
    )
    .unwrap();
    let answer = content::create_answer(&conn, &bob.id, &question.id, "Base case", at(2)).unwrap();
    drop(conn);

    Fixture {
        pool,
        alice: alice.id,
        bob: bob.id,
        question: question.id,
        answer: answer.id,
        _dir: dir,
    }
}
