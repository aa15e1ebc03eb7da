//! Domain entities mirrored from the board server.

use std::hash::Hash;

use time::OffsetDateTime;

pub type BoardId = i64;
pub type PostId = i64;
pub type CommentId = i64;

/// Stable identity used to deduplicate accumulated list items.
pub trait Identified {
    type Id: Clone + Eq + Hash + std::fmt::Debug;

    fn id(&self) -> Self::Id;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: i64,
    pub nickname: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub description: String,
    pub slug: String,
    pub created_at: OffsetDateTime,
}

impl Identified for Board {
    type Id = BoardId;

    fn id(&self) -> BoardId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OgPreview {
    pub url: String,
    pub title: Option<String>,
    pub image: Option<String>,
}

/// Liked flag plus counter, the pair a like toggle changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i64,
}

impl LikeState {
    /// The state a successful toggle is expected to produce.
    pub fn toggled(self) -> Self {
        if self.liked {
            Self {
                liked: false,
                like_count: (self.like_count - 1).max(0),
            }
        } else {
            Self {
                liked: true,
                like_count: self.like_count + 1,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub id: PostId,
    pub board_slug: String,
    pub title: String,
    pub excerpt: String,
    pub like_count: i64,
    pub view_count: i64,
    pub liked_by_me: bool,
    pub search_snippet: Option<String>,
    pub og: Option<OgPreview>,
    pub author: Author,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PostSummary {
    pub fn like_state(&self) -> LikeState {
        LikeState {
            liked: self.liked_by_me,
            like_count: self.like_count,
        }
    }

    pub fn set_like_state(&mut self, state: LikeState) {
        self.liked_by_me = state.liked;
        self.like_count = state.like_count;
    }
}

impl Identified for PostSummary {
    type Id = PostId;

    fn id(&self) -> PostId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
    pub id: PostId,
    pub board_slug: String,
    pub title: String,
    pub body_md: String,
    pub like_count: i64,
    pub view_count: i64,
    pub liked_by_me: bool,
    pub og: Option<OgPreview>,
    pub author: Author,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PostDetail {
    pub fn like_state(&self) -> LikeState {
        LikeState {
            liked: self.liked_by_me,
            like_count: self.like_count,
        }
    }

    pub fn set_like_state(&mut self, state: LikeState) {
        self.liked_by_me = state.liked;
        self.like_count = state.like_count;
    }
}

/// A single comment as delivered by the server, before threading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub body: String,
    pub author: Author,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub is_deleted: bool,
}
