//! The remote resource seam the sync layer talks through.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::application::pagination::{Page, PageRequest};
use crate::cache::CacheKey;
use crate::domain::entities::{
    Board, BoardId, CommentId, CommentRecord, LikeState, PostDetail, PostId, PostSummary,
};
use crate::domain::error::SyncError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PostSort {
    #[default]
    Latest,
    Likes,
    Views,
}

impl PostSort {
    pub fn as_str(self) -> &'static str {
        match self {
            PostSort::Latest => "latest",
            PostSort::Likes => "likes",
            PostSort::Views => "views",
        }
    }
}

impl fmt::Display for PostSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostSort {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "latest" => Ok(PostSort::Latest),
            "likes" => Ok(PostSort::Likes),
            "views" => Ok(PostSort::Views),
            other => Err(SyncError::validation(format!(
                "unknown sort `{other}`; expected latest, likes or views"
            ))),
        }
    }
}

/// Filter dimensions of a board's post list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PostListFilter {
    pub sort: PostSort,
    /// Full-text search; always trimmed, never empty.
    query: Option<String>,
}

impl PostListFilter {
    pub fn new(sort: PostSort, query: Option<impl AsRef<str>>) -> Self {
        let query = query
            .map(|raw| raw.as_ref().trim().to_string())
            .filter(|text| !text.is_empty());
        Self { sort, query }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Named dimensions as they appear in a cache key.
    pub fn dimensions(&self) -> Vec<(&'static str, String)> {
        let mut dims = vec![("sort", self.sort.as_str().to_string())];
        if let Some(query) = &self.query {
            dims.push(("q", query.clone()));
        }
        dims
    }

    /// Recover the filter a post-list key was derived from.
    pub fn from_key(key: &CacheKey) -> Self {
        let sort = key
            .filter("sort")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();
        Self::new(sort, key.filter("q"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDraft {
    pub name: String,
    pub description: String,
    pub slug: String,
}

/// Partial board update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub body_md: String,
}

/// Network access to the board server.
///
/// Every failure is reported as a `SyncError` so callers see one taxonomy.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn list_boards(&self) -> Result<Vec<Board>, SyncError>;

    async fn list_posts(
        &self,
        board: &str,
        filter: &PostListFilter,
        page: PageRequest,
    ) -> Result<Page<PostSummary>, SyncError>;

    async fn get_post(&self, id: PostId) -> Result<PostDetail, SyncError>;

    /// Comments of a post as a flat list, parents linked by id.
    async fn list_comments(&self, post_id: PostId) -> Result<Vec<CommentRecord>, SyncError>;

    /// Returns the authoritative state after the toggle.
    async fn toggle_like(&self, post_id: PostId) -> Result<LikeState, SyncError>;

    async fn create_comment(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        body: &str,
    ) -> Result<CommentRecord, SyncError>;

    async fn update_comment(&self, id: CommentId, body: &str) -> Result<CommentRecord, SyncError>;

    async fn delete_comment(&self, id: CommentId) -> Result<(), SyncError>;

    async fn create_board(&self, draft: &BoardDraft) -> Result<Board, SyncError>;

    async fn update_board(&self, id: BoardId, changes: &BoardChanges) -> Result<Board, SyncError>;

    async fn delete_board(&self, id: BoardId) -> Result<(), SyncError>;

    async fn create_post(&self, board: &str, draft: &PostDraft) -> Result<PostDetail, SyncError>;

    async fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<PostDetail, SyncError>;

    async fn delete_post(&self, id: PostId) -> Result<(), SyncError>;
}

/// Client for tests that only exercise local cache state; every call fails.
#[cfg(test)]
pub(crate) struct OfflineClient;

#[cfg(test)]
#[async_trait]
impl ResourceClient for OfflineClient {
    async fn list_boards(&self) -> Result<Vec<Board>, SyncError> {
        Err(offline())
    }

    async fn list_posts(
        &self,
        _: &str,
        _: &PostListFilter,
        _: PageRequest,
    ) -> Result<Page<PostSummary>, SyncError> {
        Err(offline())
    }

    async fn get_post(&self, _: PostId) -> Result<PostDetail, SyncError> {
        Err(offline())
    }

    async fn list_comments(&self, _: PostId) -> Result<Vec<CommentRecord>, SyncError> {
        Err(offline())
    }

    async fn toggle_like(&self, _: PostId) -> Result<LikeState, SyncError> {
        Err(offline())
    }

    async fn create_comment(
        &self,
        _: PostId,
        _: Option<CommentId>,
        _: &str,
    ) -> Result<CommentRecord, SyncError> {
        Err(offline())
    }

    async fn update_comment(&self, _: CommentId, _: &str) -> Result<CommentRecord, SyncError> {
        Err(offline())
    }

    async fn delete_comment(&self, _: CommentId) -> Result<(), SyncError> {
        Err(offline())
    }

    async fn create_board(&self, _: &BoardDraft) -> Result<Board, SyncError> {
        Err(offline())
    }

    async fn update_board(&self, _: BoardId, _: &BoardChanges) -> Result<Board, SyncError> {
        Err(offline())
    }

    async fn delete_board(&self, _: BoardId) -> Result<(), SyncError> {
        Err(offline())
    }

    async fn create_post(&self, _: &str, _: &PostDraft) -> Result<PostDetail, SyncError> {
        Err(offline())
    }

    async fn update_post(&self, _: PostId, _: &PostDraft) -> Result<PostDetail, SyncError> {
        Err(offline())
    }

    async fn delete_post(&self, _: PostId) -> Result<(), SyncError> {
        Err(offline())
    }
}

#[cfg(test)]
fn offline() -> SyncError {
    SyncError::network("offline")
}
