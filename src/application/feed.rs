//! `FeedSync`: the entry point presentation code uses to read, page through
//! and change board data.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::application::client::{BoardChanges, BoardDraft, PostDraft, PostListFilter, ResourceClient};
use crate::application::mutation::OptimisticMutationCoordinator;
use crate::application::pagination::PageRequest;
use crate::cache::{
    CacheConfig, CacheEntry, CacheKey, CachedValue, MutationKind, QueryCache, ResourceKind, Scope,
    Subscription,
};
use crate::domain::comments::{CommentForest, DeleteOutcome};
use crate::domain::entities::{
    Author, Board, BoardId, CommentId, CommentRecord, LikeState, PostDetail, PostId,
};
use crate::domain::error::SyncError;

const TARGET: &str = "boardsync::application::feed";

/// A change requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Toggle the viewer's like on a post shown under `view`, which may be
    /// the post's detail key or any post-list key containing it.
    ToggleLike { view: CacheKey, post_id: PostId },
    CreateComment {
        post_id: PostId,
        parent_id: Option<CommentId>,
        body: String,
    },
    EditComment {
        post_id: PostId,
        comment_id: CommentId,
        body: String,
    },
    DeleteComment { post_id: PostId, comment_id: CommentId },
    CreateBoard(BoardDraft),
    UpdateBoard {
        id: BoardId,
        slug: String,
        changes: BoardChanges,
    },
    DeleteBoard { id: BoardId, slug: String },
    CreatePost { board: String, draft: PostDraft },
    UpdatePost {
        post_id: PostId,
        board: String,
        draft: PostDraft,
    },
    DeletePost { post_id: PostId, board: String },
}

/// What a successful mutation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResult {
    Liked(LikeState),
    CommentCreated(CommentRecord),
    CommentUpdated(CommentRecord),
    CommentDeleted(DeleteOutcome),
    BoardSaved(Board),
    BoardDeleted,
    PostSaved(PostDetail),
    PostDeleted,
}

/// How a `load_more` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMore {
    /// The next page was merged; `added` counts items not seen before.
    Appended { added: usize },
    /// The list has no further pages.
    Exhausted,
    /// The entry changed while the page was in flight; the page was dropped.
    Discarded,
}

pub struct FeedSync {
    cache: QueryCache,
    mutations: OptimisticMutationCoordinator,
    config: CacheConfig,
    viewer: Author,
    next_local_id: AtomicI64,
}

impl FeedSync {
    pub fn new(client: Arc<dyn ResourceClient>, config: CacheConfig) -> Self {
        let cache = QueryCache::new(client, &config);
        Self {
            mutations: OptimisticMutationCoordinator::new(cache.clone()),
            cache,
            config,
            viewer: Author {
                id: 0,
                nickname: String::new(),
                is_admin: false,
            },
            next_local_id: AtomicI64::new(-1),
        }
    }

    /// Author shown on optimistic comments until the server answers.
    pub fn with_viewer(mut self, viewer: Author) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn read(&self, key: &CacheKey) -> CacheEntry {
        self.cache.read(key).await
    }

    pub fn subscribe<F>(&self, key: &CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        self.cache.subscribe(key, listener)
    }

    /// Fetch the page after the last one accumulated under a post-list key.
    ///
    /// A stale or failed list is fetched again from the first page before
    /// paging. The page is merged only if the list still expects its cursor
    /// and the entry is still at the version seen when the request went out.
    /// A failed fetch is returned and leaves the accumulated pages untouched.
    pub async fn load_more(&self, key: &CacheKey) -> Result<LoadMore, SyncError> {
        let Scope::Board(board) = key.scope() else {
            return Err(SyncError::validation(format!("{key} is not a post list")));
        };
        if key.kind() != ResourceKind::PostList {
            return Err(SyncError::validation(format!("{key} is not a post list")));
        }

        let entry = match self.cache.peek(key) {
            Some(entry) if entry.value.is_some() && !entry.needs_fetch() => entry,
            _ => self.cache.read(key).await,
        };
        if !entry.is_success() {
            return Err(entry
                .error
                .unwrap_or_else(|| SyncError::not_found(format!("nothing loaded under {key}"))));
        }
        let version = entry.version;
        let Some(mut collection) = entry.value.as_ref().and_then(CachedValue::as_posts).cloned()
        else {
            return Err(SyncError::not_found(format!("nothing loaded under {key}")));
        };
        let Some(cursor) = collection.next_cursor() else {
            return Ok(LoadMore::Exhausted);
        };

        let filter = PostListFilter::from_key(key);
        debug!(target: TARGET, cache_key = %key, version, cursor = %cursor, "loading next page");
        let page = self
            .cache
            .client()
            .list_posts(board, &filter, PageRequest::new(self.config.page_limit(), cursor))
            .await?;

        let continues = self
            .cache
            .peek(key)
            .and_then(|current| current.value)
            .and_then(|value| value.as_posts().map(|posts| posts.expects(cursor)))
            .unwrap_or(false);
        if !continues {
            debug!(target: TARGET, cache_key = %key, cursor = %cursor, "page no longer continues the list");
            return Ok(LoadMore::Discarded);
        }

        let added = collection.append_page(page);
        if self
            .cache
            .write_if_version(key, version, CachedValue::Posts(collection))
        {
            Ok(LoadMore::Appended { added })
        } else {
            Ok(LoadMore::Discarded)
        }
    }

    pub async fn mutate(&self, mutation: Mutation) -> Result<MutationResult, SyncError> {
        match mutation {
            Mutation::ToggleLike { view, post_id } => self.toggle_like(view, post_id).await,
            Mutation::CreateComment {
                post_id,
                parent_id,
                body,
            } => self.create_comment(post_id, parent_id, body).await,
            Mutation::EditComment {
                post_id,
                comment_id,
                body,
            } => self.edit_comment(post_id, comment_id, body).await,
            Mutation::DeleteComment {
                post_id,
                comment_id,
            } => self.delete_comment(post_id, comment_id).await,
            Mutation::CreateBoard(draft) => {
                let client = Arc::clone(self.cache.client());
                let kind = MutationKind::BoardCreate {
                    slug: draft.slug.clone(),
                };
                self.mutations
                    .run_remote(kind, || async move { client.create_board(&draft).await })
                    .await
                    .map(MutationResult::BoardSaved)
            }
            Mutation::UpdateBoard { id, slug, changes } => {
                let client = Arc::clone(self.cache.client());
                let kind = MutationKind::BoardUpdate {
                    slug,
                    renamed_to: changes.slug.clone(),
                };
                self.mutations
                    .run_remote(kind, || async move { client.update_board(id, &changes).await })
                    .await
                    .map(MutationResult::BoardSaved)
            }
            Mutation::DeleteBoard { id, slug } => {
                let client = Arc::clone(self.cache.client());
                self.mutations
                    .run_remote(MutationKind::BoardDelete { slug }, || async move {
                        client.delete_board(id).await
                    })
                    .await
                    .map(|()| MutationResult::BoardDeleted)
            }
            Mutation::CreatePost { board, draft } => {
                let client = Arc::clone(self.cache.client());
                let kind = MutationKind::PostCreate {
                    board: board.clone(),
                };
                self.mutations
                    .run_remote(kind, || async move { client.create_post(&board, &draft).await })
                    .await
                    .map(MutationResult::PostSaved)
            }
            Mutation::UpdatePost {
                post_id,
                board,
                draft,
            } => {
                let client = Arc::clone(self.cache.client());
                self.mutations
                    .run_remote(MutationKind::PostUpdate { post_id, board }, || async move {
                        client.update_post(post_id, &draft).await
                    })
                    .await
                    .map(MutationResult::PostSaved)
            }
            Mutation::DeletePost { post_id, board } => {
                let client = Arc::clone(self.cache.client());
                self.mutations
                    .run_remote(MutationKind::PostDelete { post_id, board }, || async move {
                        client.delete_post(post_id).await
                    })
                    .await
                    .map(|()| MutationResult::PostDeleted)
            }
        }
    }

    /// Drop all cached state and listeners.
    pub fn teardown(&self) {
        self.cache.teardown();
    }

    async fn toggle_like(&self, view: CacheKey, post_id: PostId) -> Result<MutationResult, SyncError> {
        let entry = self.ensure_loaded(&view).await?;
        let board = match (view.kind(), view.scope()) {
            (ResourceKind::PostList, Scope::Board(board)) => board.clone(),
            (ResourceKind::PostDetail, _) => entry
                .value
                .as_ref()
                .and_then(CachedValue::as_post)
                .map(|post| post.board_slug.clone())
                .ok_or_else(|| SyncError::not_found(format!("post {post_id} is not loaded")))?,
            _ => {
                return Err(SyncError::validation(format!(
                    "likes cannot be toggled from {view}"
                )));
            }
        };

        let client = Arc::clone(self.cache.client());
        let trust_server = self.config.trust_server_like_count;
        let settlement = self
            .mutations
            .run(
                &view,
                MutationKind::LikeToggle { post_id, board },
                |value| set_like(value, post_id, |state| state.toggled()),
                || async move { client.toggle_like(post_id).await },
                |value, server: &LikeState| {
                    if trust_server {
                        set_like(value, post_id, |_| *server)
                    } else {
                        Ok(())
                    }
                },
            )
            .await;
        settlement.result.map(MutationResult::Liked)
    }

    async fn create_comment(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        body: String,
    ) -> Result<MutationResult, SyncError> {
        let key = CacheKey::comment_list(post_id);
        self.ensure_loaded(&key).await?;

        let body = body.trim().to_string();
        let local_id = self.next_local_id.fetch_sub(1, Ordering::Relaxed);
        let now = OffsetDateTime::now_utc();
        let placeholder = CommentRecord {
            id: local_id,
            post_id,
            parent_id,
            body: body.clone(),
            author: self.viewer.clone(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
        };

        let client = Arc::clone(self.cache.client());
        let settlement = self
            .mutations
            .run(
                &key,
                MutationKind::CommentCreate { post_id },
                |value| {
                    let forest = comments_mut(value)?;
                    match parent_id {
                        Some(parent) => forest.insert_reply(parent, placeholder),
                        None => forest.insert_root(placeholder),
                    }
                },
                || async move { client.create_comment(post_id, parent_id, &body).await },
                |value, record: &CommentRecord| comments_mut(value)?.replace_node(local_id, record.clone()),
            )
            .await;
        info!(
            target: TARGET,
            post_id,
            local_id,
            state = %settlement.state,
            "comment create settled"
        );
        settlement.result.map(MutationResult::CommentCreated)
    }

    async fn edit_comment(
        &self,
        post_id: PostId,
        comment_id: CommentId,
        body: String,
    ) -> Result<MutationResult, SyncError> {
        let key = CacheKey::comment_list(post_id);
        self.ensure_loaded(&key).await?;

        let client = Arc::clone(self.cache.client());
        let body = body.trim().to_string();
        let local_body = body.clone();
        self.mutations
            .run(
                &key,
                MutationKind::CommentUpdate { post_id },
                |value| comments_mut(value)?.update_body(comment_id, local_body),
                || async move { client.update_comment(comment_id, &body).await },
                |value, record: &CommentRecord| {
                    comments_mut(value)?.update_body(record.id, record.body.clone())
                },
            )
            .await
            .result
            .map(MutationResult::CommentUpdated)
    }

    async fn delete_comment(
        &self,
        post_id: PostId,
        comment_id: CommentId,
    ) -> Result<MutationResult, SyncError> {
        let key = CacheKey::comment_list(post_id);
        self.ensure_loaded(&key).await?;

        let client = Arc::clone(self.cache.client());
        let mut outcome = DeleteOutcome::Removed;
        let result = self
            .mutations
            .run(
                &key,
                MutationKind::CommentDelete { post_id },
                |value| {
                    outcome = comments_mut(value)?.delete_node(comment_id)?;
                    Ok(())
                },
                || async move { client.delete_comment(comment_id).await },
                |_, _| Ok(()),
            )
            .await
            .result;
        result.map(|()| MutationResult::CommentDeleted(outcome))
    }

    /// Make sure `key` has a value to mutate, reading it if needed.
    async fn ensure_loaded(&self, key: &CacheKey) -> Result<CacheEntry, SyncError> {
        if let Some(entry) = self.cache.peek(key).filter(|entry| entry.value.is_some()) {
            return Ok(entry);
        }
        let entry = self.cache.read(key).await;
        if entry.value.is_some() {
            return Ok(entry);
        }
        Err(entry
            .error
            .unwrap_or_else(|| SyncError::not_found(format!("nothing loaded under {key}"))))
    }
}

fn comments_mut(value: &mut CachedValue) -> Result<&mut CommentForest, SyncError> {
    value
        .as_comments_mut()
        .ok_or_else(|| SyncError::validation("cached value is not a comment thread"))
}

/// Rewrite the like state of `post_id` wherever it appears in `value`.
fn set_like(
    value: &mut CachedValue,
    post_id: PostId,
    next: impl Fn(LikeState) -> LikeState,
) -> Result<(), SyncError> {
    let found = match value {
        CachedValue::Post(post) if post.id == post_id => {
            post.set_like_state(next(post.like_state()));
            true
        }
        CachedValue::Posts(posts) => posts.update_item(&post_id, |item| {
            item.set_like_state(next(item.like_state()));
        }),
        _ => false,
    };
    if found {
        Ok(())
    } else {
        Err(SyncError::not_found(format!("post {post_id} is not in this view")))
    }
}
