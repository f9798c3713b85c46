// Domain types - plain data and pure transitions, no database access
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh time-ordered identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(UserId);
string_id!(QuestionId);
string_id!(AnswerId);

/// Stored value of a vote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Like,
    Dislike,
    #[default]
    Unvoted,
}

/// What the voter asked for. There is no "unvote" direction: repeating
/// the current direction clears the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Like,
    Dislike,
}

impl Vote {
    pub fn value(self) -> i64 {
        match self {
            Vote::Like => 1,
            Vote::Dislike => -1,
            Vote::Unvoted => 0,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(Vote::Like),
            -1 => Some(Vote::Dislike),
            0 => Some(Vote::Unvoted),
            _ => None,
        }
    }

    /// Apply a like/dislike request to the current value.
    ///
    /// Same direction as stored clears the vote; anything else moves straight
    /// to the requested direction, so `Like -> Dislike` never passes through
    /// `Unvoted`.
    pub fn toggle(self, direction: Direction) -> Self {
        let requested = Vote::from(direction);
        if self == requested {
            Vote::Unvoted
        } else {
            requested
        }
    }
}

impl From<Direction> for Vote {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Like => Vote::Like,
            Direction::Dislike => Vote::Dislike,
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(Direction::Like),
            "dislike" => Ok(Direction::Dislike),
            other => Err(format!("Unknown vote direction: {other}")),
        }
    }
}

/// Something that can be voted on.
///
/// Both variants share one vote protocol; the variant only decides which
/// tables and columns hold the records and the cached score.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VoteTarget {
    Question(QuestionId),
    Answer(AnswerId),
}

impl VoteTarget {
    pub fn id(&self) -> &str {
        match self {
            VoteTarget::Question(id) => id.as_str(),
            VoteTarget::Answer(id) => id.as_str(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "question",
            VoteTarget::Answer(_) => "answer",
        }
    }

    /// Table holding the target itself (and its cached score).
    pub(crate) fn content_table(&self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "questions",
            VoteTarget::Answer(_) => "answers",
        }
    }

    /// Table holding the per-user vote records.
    pub(crate) fn vote_table(&self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "question_votes",
            VoteTarget::Answer(_) => "answer_votes",
        }
    }

    /// Foreign key column in `vote_table` pointing at the target.
    pub(crate) fn vote_column(&self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "question_id",
            VoteTarget::Answer(_) => "answer_id",
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub target: VoteTarget,
    pub user_id: UserId,
    pub vote: Vote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub nickname: String,
    pub avatar_path: Option<String>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub author_id: Option<UserId>,
    pub title: String,
    pub text: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub question_id: QuestionId,
    pub author_id: Option<UserId>,
    pub text: String,
    pub is_correct: bool,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub label: String,
}

/// Author reference loaded alongside listed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub user_id: UserId,
    pub nickname: String,
    pub avatar_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionListing {
    pub question: Question,
    pub author: Option<AuthorRef>,
    pub tags: Vec<String>,
    pub answer_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerListing {
    pub answer: Answer,
    pub author: Option<AuthorRef>,
}

/// Already-validated input for a new question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub title: String,
    pub text: String,
    pub tags: Vec<String>,
}

/// Already-validated input for a new account and its profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub nickname: &'a str,
    pub avatar_path: Option<&'a str>,
    pub password_hash: &'a str,
}

/// A contiguous slice of an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

impl Window {
    pub(crate) fn sql_args(self) -> (i64, i64) {
        (
            i64::try_from(self.limit).unwrap_or(i64::MAX),
            i64::try_from(self.offset).unwrap_or(i64::MAX),
        )
    }
}

/// Fixed-width UTC timestamp so that text ordering in SQL matches time ordering.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}
