pub mod content;
pub mod domain;
pub mod error;
pub mod scores;
pub mod votes;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::{
    Answer, AnswerId, AnswerListing, AuthorRef, Direction, NewQuestion, NewUser, Profile,
    Question, QuestionId, QuestionListing, Tag, User, UserId, Vote, VoteRecord, VoteTarget,
    Window,
};
pub use error::{QaError, QaResult};
