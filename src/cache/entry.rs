//! Cache entries and the values they hold.

use crate::application::pagination::PaginatedCollection;
use crate::domain::comments::CommentForest;
use crate::domain::entities::{Board, PostDetail, PostSummary};
use crate::domain::error::SyncError;

/// Server state held under one key; the variant follows the key's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Boards(Vec<Board>),
    Posts(PaginatedCollection<PostSummary>),
    Post(PostDetail),
    Comments(CommentForest),
}

impl CachedValue {
    pub fn as_boards(&self) -> Option<&[Board]> {
        match self {
            CachedValue::Boards(boards) => Some(boards),
            _ => None,
        }
    }

    pub fn as_posts(&self) -> Option<&PaginatedCollection<PostSummary>> {
        match self {
            CachedValue::Posts(posts) => Some(posts),
            _ => None,
        }
    }

    pub fn as_posts_mut(&mut self) -> Option<&mut PaginatedCollection<PostSummary>> {
        match self {
            CachedValue::Posts(posts) => Some(posts),
            _ => None,
        }
    }

    pub fn as_post(&self) -> Option<&PostDetail> {
        match self {
            CachedValue::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn as_post_mut(&mut self) -> Option<&mut PostDetail> {
        match self {
            CachedValue::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn as_comments(&self) -> Option<&CommentForest> {
        match self {
            CachedValue::Comments(forest) => Some(forest),
            _ => None,
        }
    }

    pub fn as_comments_mut(&mut self) -> Option<&mut CommentForest> {
        match self {
            CachedValue::Comments(forest) => Some(forest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Success,
    Error,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Success => "success",
            EntryStatus::Error => "error",
        }
    }
}

/// Snapshot of one key's state.
///
/// `version` grows by one on every write, error, invalidation and restore.
/// A pending entry may still carry the value it had before it was
/// invalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub status: EntryStatus,
    pub value: Option<CachedValue>,
    pub error: Option<SyncError>,
    pub version: u64,
    pub stale: bool,
}

impl CacheEntry {
    pub(crate) fn pending() -> Self {
        Self {
            status: EntryStatus::Pending,
            value: None,
            error: None,
            version: 0,
            stale: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EntryStatus::Success
    }

    /// Whether the next `read` has to go to the server.
    pub fn needs_fetch(&self) -> bool {
        self.stale || self.status == EntryStatus::Error
    }
}
