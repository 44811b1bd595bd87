use serde::Serialize;

/// Result of an upvote attempt. A repeated vote is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VoteOutcome {
    Counted { score: i32 },
    AlreadyVoted { score: i32 },
}

impl VoteOutcome {
    pub fn counted(&self) -> bool {
        matches!(self, VoteOutcome::Counted { .. })
    }
}
