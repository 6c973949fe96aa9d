use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A catalog entry together with its denormalized net vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Unique identifier for the book
    pub id: Uuid,
    /// Account that created the book
    pub account_id: Uuid,
    /// Title of the book; never empty
    pub title: String,
    /// Author of the book
    pub author: String,
    /// Publication year
    pub year: i32,
    /// Net votes, always recomputed from the vote ledger
    pub upvotes: i64,
}

impl Book {
    /// A fresh book owned by `account_id` with an empty vote tally.
    pub fn new(account_id: Uuid, title: String, author: String, year: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            account_id,
            title,
            author,
            year,
            upvotes: 0,
        }
    }
}

/// Request model for creating a new book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBook {
    /// Owner; taken from the bearer token subject when it names an account
    #[serde(default)]
    pub account_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub year: i32,
}

/// Request model for a partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBook {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
}

impl UpdateBook {
    pub fn apply_to(self, mut book: Book) -> Book {
        if let Some(title) = self.title {
            book.title = title;
        }
        if let Some(author) = self.author {
            book.author = author;
        }
        if let Some(year) = self.year {
            book.year = year;
        }
        book
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Contribution of one vote in this direction to the net count.
    pub fn weight(self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(VoteDirection::Up),
            "down" => Some(VoteDirection::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One account's standing vote on one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEntry {
    pub account_id: Uuid,
    pub book_id: Uuid,
    pub direction: VoteDirection,
    pub updated_at: OffsetDateTime,
}
