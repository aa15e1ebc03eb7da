#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use boardsync::application::client::{
    BoardChanges, BoardDraft, PostDraft, PostListFilter, PostSort, ResourceClient,
};
use boardsync::application::pagination::{Page, PageCursor, PageRequest};
use boardsync::domain::entities::{
    Author, Board, BoardId, CommentId, CommentRecord, LikeState, PostDetail, PostId, PostSummary,
};
use boardsync::domain::error::SyncError;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::{Semaphore, mpsc};

pub const BOARD: &str = "general";

pub fn author(id: i64) -> Author {
    Author {
        id,
        nickname: format!("user{id}"),
        is_admin: false,
    }
}

fn at(minutes: i64) -> OffsetDateTime {
    datetime!(2024-03-01 09:00 UTC) + time::Duration::minutes(minutes)
}

pub fn post(id: PostId, like_count: i64, liked_by_me: bool) -> PostSummary {
    PostSummary {
        id,
        board_slug: BOARD.to_string(),
        title: format!("post {id}"),
        excerpt: String::new(),
        like_count,
        view_count: 0,
        liked_by_me,
        search_snippet: None,
        og: None,
        author: author(1),
        created_at: at(id),
        updated_at: at(id),
    }
}

pub fn comment(id: CommentId, post_id: PostId, parent_id: Option<CommentId>) -> CommentRecord {
    CommentRecord {
        id,
        post_id,
        parent_id,
        body: format!("comment {id}"),
        author: author(2),
        created_at: at(id),
        updated_at: at(id),
        is_deleted: false,
    }
}

/// In-memory board server with switches for failures and pacing.
#[derive(Default)]
pub struct ScriptedClient {
    pub boards: Mutex<Vec<Board>>,
    pub posts: Mutex<Vec<PostSummary>>,
    pub comments: Mutex<HashMap<PostId, Vec<CommentRecord>>>,
    /// Failure returned by the next mutating call.
    pub fail_next_write: Mutex<Option<SyncError>>,
    /// Number of upcoming reads that fail with a network error.
    pub failing_reads: AtomicUsize,
    pub list_posts_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    next_comment_id: AtomicI64,
    gate: Option<Arc<Semaphore>>,
    started: Option<mpsc::UnboundedSender<&'static str>>,
    write_gate: Option<Arc<Semaphore>>,
    writes_started: Option<mpsc::UnboundedSender<&'static str>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            next_comment_id: AtomicI64::new(100),
            ..Default::default()
        }
    }

    pub fn with_posts(self, posts: Vec<PostSummary>) -> Self {
        *self.posts.lock().expect("posts") = posts;
        self
    }

    pub fn with_comments(self, post_id: PostId, records: Vec<CommentRecord>) -> Self {
        self.comments.lock().expect("comments").insert(post_id, records);
        self
    }

    /// Hold every read until a permit is added to the returned semaphore,
    /// announcing each read on the returned channel as it starts.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<&'static str>) {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        self.gate = Some(Arc::clone(&gate));
        self.started = Some(tx);
        (self, gate, rx)
    }

    /// Like `gated`, but holds like toggles instead of reads.
    pub fn gated_writes(mut self) -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<&'static str>) {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        self.write_gate = Some(Arc::clone(&gate));
        self.writes_started = Some(tx);
        (self, gate, rx)
    }

    pub fn fail_next_write(&self, error: SyncError) {
        *self.fail_next_write.lock().expect("failure slot") = Some(error);
    }

    async fn begin_read(&self, name: &'static str) -> Result<(), SyncError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(started) = &self.started {
            let _ = started.send(name);
        }
        match &self.gate {
            Some(gate) => {
                let permit = gate.acquire().await.expect("gate open");
                permit.forget();
            }
            None => tokio::task::yield_now().await,
        }
        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(SyncError::network("connection reset"));
        }
        Ok(())
    }

    fn begin_write(&self) -> Result<(), SyncError> {
        match self.fail_next_write.lock().expect("failure slot").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn detail_of(summary: &PostSummary) -> PostDetail {
        PostDetail {
            id: summary.id,
            board_slug: summary.board_slug.clone(),
            title: summary.title.clone(),
            body_md: format!("body of {}", summary.title),
            like_count: summary.like_count,
            view_count: summary.view_count,
            liked_by_me: summary.liked_by_me,
            og: None,
            author: summary.author.clone(),
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

#[async_trait]
impl ResourceClient for ScriptedClient {
    async fn list_boards(&self) -> Result<Vec<Board>, SyncError> {
        self.begin_read("boards").await?;
        Ok(self.boards.lock().expect("boards").clone())
    }

    async fn list_posts(
        &self,
        board: &str,
        filter: &PostListFilter,
        page: PageRequest,
    ) -> Result<Page<PostSummary>, SyncError> {
        self.list_posts_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_read("posts").await?;

        let mut matching: Vec<PostSummary> = self
            .posts
            .lock()
            .expect("posts")
            .iter()
            .filter(|post| post.board_slug == board)
            .filter(|post| filter.query().is_none_or(|q| post.title.contains(q)))
            .cloned()
            .collect();
        match filter.sort {
            PostSort::Latest => matching.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            PostSort::Likes => matching.sort_by(|a, b| b.like_count.cmp(&a.like_count)),
            PostSort::Views => matching.sort_by(|a, b| b.view_count.cmp(&a.view_count)),
        }

        let offset = page.cursor.offset() as usize;
        let end = (offset + page.limit as usize).min(matching.len());
        let items = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let has_more = end < matching.len();
        let next = has_more.then(|| PageCursor::new(end as u32));
        Ok(Page::new(items, next, has_more))
    }

    async fn get_post(&self, id: PostId) -> Result<PostDetail, SyncError> {
        self.begin_read("post").await?;
        self.posts
            .lock()
            .expect("posts")
            .iter()
            .find(|post| post.id == id)
            .map(Self::detail_of)
            .ok_or_else(|| SyncError::not_found(format!("post {id}")))
    }

    async fn list_comments(&self, post_id: PostId) -> Result<Vec<CommentRecord>, SyncError> {
        self.begin_read("comments").await?;
        Ok(self
            .comments
            .lock()
            .expect("comments")
            .get(&post_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn toggle_like(&self, post_id: PostId) -> Result<LikeState, SyncError> {
        if let Some(started) = &self.writes_started {
            let _ = started.send("like");
        }
        match &self.write_gate {
            Some(gate) => gate.acquire().await.expect("gate open").forget(),
            None => tokio::task::yield_now().await,
        }
        self.begin_write()?;
        let mut posts = self.posts.lock().expect("posts");
        let post = posts
            .iter_mut()
            .find(|post| post.id == post_id)
            .ok_or_else(|| SyncError::not_found(format!("post {post_id}")))?;
        let next = post.like_state().toggled();
        post.set_like_state(next);
        Ok(next)
    }

    async fn create_comment(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        body: &str,
    ) -> Result<CommentRecord, SyncError> {
        tokio::task::yield_now().await;
        self.begin_write()?;
        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst);
        let mut record = comment(id, post_id, parent_id);
        record.body = body.to_string();
        self.comments
            .lock()
            .expect("comments")
            .entry(post_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update_comment(&self, id: CommentId, body: &str) -> Result<CommentRecord, SyncError> {
        tokio::task::yield_now().await;
        self.begin_write()?;
        let mut comments = self.comments.lock().expect("comments");
        let record = comments
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|record| record.id == id)
            .ok_or_else(|| SyncError::not_found(format!("comment {id}")))?;
        record.body = body.to_string();
        Ok(record.clone())
    }

    async fn delete_comment(&self, id: CommentId) -> Result<(), SyncError> {
        tokio::task::yield_now().await;
        self.begin_write()?;
        let mut comments = self.comments.lock().expect("comments");
        for records in comments.values_mut() {
            records.retain(|record| record.id != id);
        }
        Ok(())
    }

    async fn create_board(&self, draft: &BoardDraft) -> Result<Board, SyncError> {
        self.begin_write()?;
        let mut boards = self.boards.lock().expect("boards");
        if boards.iter().any(|board| board.slug == draft.slug) {
            return Err(SyncError::conflict("슬러그가 이미 존재합니다."));
        }
        let board = Board {
            id: boards.len() as BoardId + 1,
            name: draft.name.clone(),
            description: draft.description.clone(),
            slug: draft.slug.clone(),
            created_at: at(0),
        };
        boards.push(board.clone());
        Ok(board)
    }

    async fn update_board(&self, id: BoardId, changes: &BoardChanges) -> Result<Board, SyncError> {
        self.begin_write()?;
        let mut boards = self.boards.lock().expect("boards");
        let board = boards
            .iter_mut()
            .find(|board| board.id == id)
            .ok_or_else(|| SyncError::not_found(format!("board {id}")))?;
        if let Some(name) = &changes.name {
            board.name = name.clone();
        }
        if let Some(slug) = &changes.slug {
            board.slug = slug.clone();
        }
        Ok(board.clone())
    }

    async fn delete_board(&self, id: BoardId) -> Result<(), SyncError> {
        self.begin_write()?;
        self.boards.lock().expect("boards").retain(|board| board.id != id);
        Ok(())
    }

    async fn create_post(&self, board: &str, draft: &PostDraft) -> Result<PostDetail, SyncError> {
        self.begin_write()?;
        let mut posts = self.posts.lock().expect("posts");
        let id = posts.iter().map(|post| post.id).max().unwrap_or(0) + 1;
        let mut summary = post(id, 0, false);
        summary.board_slug = board.to_string();
        summary.title = draft.title.clone();
        posts.push(summary.clone());
        Ok(Self::detail_of(&summary))
    }

    async fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<PostDetail, SyncError> {
        self.begin_write()?;
        let mut posts = self.posts.lock().expect("posts");
        let post = posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or_else(|| SyncError::not_found(format!("post {id}")))?;
        post.title = draft.title.clone();
        Ok(Self::detail_of(post))
    }

    async fn delete_post(&self, id: PostId) -> Result<(), SyncError> {
        self.begin_write()?;
        self.posts.lock().expect("posts").retain(|post| post.id != id);
        Ok(())
    }
}
