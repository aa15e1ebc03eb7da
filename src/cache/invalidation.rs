//! Which cached views a successful mutation makes stale.

use tracing::debug;

use crate::domain::entities::PostId;

use super::keys::{CacheKey, KeyPattern, ResourceKind, Scope};
use super::store::QueryCache;

/// A committed change, described by what it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    LikeToggle { post_id: PostId, board: String },
    CommentCreate { post_id: PostId },
    CommentUpdate { post_id: PostId },
    CommentDelete { post_id: PostId },
    BoardCreate { slug: String },
    /// `renamed_to` is set when the slug changed.
    BoardUpdate { slug: String, renamed_to: Option<String> },
    BoardDelete { slug: String },
    PostCreate { board: String },
    PostUpdate { post_id: PostId, board: String },
    PostDelete { post_id: PostId, board: String },
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::LikeToggle { .. } => "like_toggle",
            MutationKind::CommentCreate { .. } => "comment_create",
            MutationKind::CommentUpdate { .. } => "comment_update",
            MutationKind::CommentDelete { .. } => "comment_delete",
            MutationKind::BoardCreate { .. } => "board_create",
            MutationKind::BoardUpdate { .. } => "board_update",
            MutationKind::BoardDelete { .. } => "board_delete",
            MutationKind::PostCreate { .. } => "post_create",
            MutationKind::PostUpdate { .. } => "post_update",
            MutationKind::PostDelete { .. } => "post_delete",
        }
    }
}

/// Static mapping from mutation kind to the key patterns it invalidates.
pub struct InvalidationGraph;

impl InvalidationGraph {
    pub fn patterns(kind: &MutationKind) -> Vec<KeyPattern> {
        match kind {
            MutationKind::LikeToggle { post_id, board } => {
                vec![post_detail(*post_id), post_lists(board)]
            }
            MutationKind::CommentCreate { post_id }
            | MutationKind::CommentUpdate { post_id }
            | MutationKind::CommentDelete { post_id } => {
                vec![KeyPattern::Exact(CacheKey::comment_list(*post_id))]
            }
            MutationKind::BoardCreate { slug } | MutationKind::BoardDelete { slug } => {
                vec![board_list(), post_lists(slug)]
            }
            MutationKind::BoardUpdate { slug, renamed_to } => {
                let mut patterns = vec![board_list(), post_lists(slug)];
                if let Some(renamed) = renamed_to.as_deref().map(post_lists) {
                    if !patterns.contains(&renamed) {
                        patterns.push(renamed);
                    }
                }
                patterns
            }
            MutationKind::PostCreate { board } => vec![post_lists(board)],
            MutationKind::PostUpdate { post_id, board } | MutationKind::PostDelete { post_id, board } => {
                vec![post_detail(*post_id), post_lists(board)]
            }
        }
    }

    /// Invalidate everything `kind` affects; returns the number of entries marked.
    pub fn apply(cache: &QueryCache, kind: &MutationKind) -> usize {
        let marked = Self::patterns(kind)
            .iter()
            .map(|pattern| cache.invalidate(pattern))
            .sum::<usize>();
        debug!(mutation_kind = kind.as_str(), marked, "applied invalidation table");
        marked
    }
}

fn board_list() -> KeyPattern {
    KeyPattern::Kind(ResourceKind::BoardList)
}

fn post_lists(board: &str) -> KeyPattern {
    KeyPattern::KindScope(ResourceKind::PostList, Scope::board(board))
}

fn post_detail(id: PostId) -> KeyPattern {
    KeyPattern::Exact(CacheKey::post_detail(id))
}
