//! `ResourceClient` backed by the board server's JSON API.

use async_trait::async_trait;
use boardsync_api_types::{
    BoardCreate, BoardOut, BoardUpdate, CommentCreate, CommentNodeOut, CommentUpdate, ErrorBody,
    LikeToggleOut, MessageOut, PostDetailOut, PostListItem, PostPage, PostWrite, UserPublic,
};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::application::client::{
    BoardChanges, BoardDraft, PostDraft, PostListFilter, ResourceClient,
};
use crate::application::pagination::{Page, PageCursor, PageRequest};
use crate::config::ApiSettings;
use crate::domain::entities::{
    Author, Board, BoardId, CommentId, CommentRecord, LikeState, OgPreview, PostDetail, PostId,
    PostSummary,
};
use crate::domain::error::SyncError;

use super::error::InfraError;
use super::session::Session;

const TARGET: &str = "boardsync::infra::remote";
const EXCERPT_CHARS: usize = 140;
const DUPLICATE_SLUG_MARKERS: [&str; 2] = ["슬러그가 이미 존재", "already exists"];

#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    client: Client,
    base: Url,
    session: Session,
}

impl HttpResourceClient {
    pub fn new(api: &ApiSettings, session: Session) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(api.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        let mut base = api.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            base,
            session,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("boardsync/", env!("CARGO_PKG_VERSION"))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The account the session's token belongs to.
    pub async fn current_user(&self) -> Result<Author, SyncError> {
        let user: UserPublic = self
            .request(Method::GET, "auth/me", &[], None::<&()>)
            .await?;
        Ok(author_from(user))
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, SyncError> {
        let mut url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|err| SyncError::validation(format!("invalid request path {path}: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Vec<u8>, SyncError> {
        let url = self.url(path, query)?;
        debug!(target: TARGET, %method, %url, "sending request");

        let mut request = self.client.request(method, url);
        if let Some(token) = self.session.token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify(status, &bytes));
        }
        Ok(bytes.to_vec())
    }

    async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, SyncError> {
        let bytes = self.send(method, path, query, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| SyncError::network(format!("unexpected response body: {err}")))
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn list_boards(&self) -> Result<Vec<Board>, SyncError> {
        let boards: Vec<BoardOut> = self
            .request(Method::GET, "boards", &[], None::<&()>)
            .await?;
        Ok(boards
            .into_iter()
            .filter(|board| !board.is_deleted)
            .map(board_from)
            .collect())
    }

    #[instrument(skip(self, filter), target = "boardsync::infra::remote", fields(sort = %filter.sort))]
    async fn list_posts(
        &self,
        board: &str,
        filter: &PostListFilter,
        page: PageRequest,
    ) -> Result<Page<PostSummary>, SyncError> {
        let mut query = vec![("sort", filter.sort.as_str().to_string())];
        if let Some(text) = filter.query() {
            query.push(("q", text.to_string()));
        }
        query.push(("offset", page.cursor.offset().to_string()));
        query.push(("limit", page.limit.to_string()));

        let path = format!("boards/{board}/posts");
        let out: PostPage = self
            .request(Method::GET, &path, &query, None::<&()>)
            .await?;

        let next_cursor = out
            .has_more
            .then(|| {
                out.next_offset
                    .unwrap_or_else(|| page.cursor.offset() + out.items.len() as u32)
            })
            .map(PageCursor::new);
        let items = out.items.into_iter().map(summary_from).collect();
        Ok(Page::new(items, next_cursor, out.has_more))
    }

    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn get_post(&self, id: PostId) -> Result<PostDetail, SyncError> {
        let out: PostDetailOut = self
            .request(Method::GET, &format!("posts/{id}"), &[], None::<&()>)
            .await?;
        Ok(detail_from(out))
    }

    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn list_comments(&self, post_id: PostId) -> Result<Vec<CommentRecord>, SyncError> {
        let nodes: Vec<CommentNodeOut> = self
            .request(
                Method::GET,
                &format!("posts/{post_id}/comments"),
                &[],
                None::<&()>,
            )
            .await?;
        Ok(flatten_comments(nodes))
    }

    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn toggle_like(&self, post_id: PostId) -> Result<LikeState, SyncError> {
        let out: LikeToggleOut = self
            .request(
                Method::POST,
                &format!("posts/{post_id}/like"),
                &[],
                None::<&()>,
            )
            .await?;
        Ok(LikeState {
            liked: out.liked,
            like_count: out.like_count,
        })
    }

    #[instrument(skip(self, body), target = "boardsync::infra::remote")]
    async fn create_comment(
        &self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        body: &str,
    ) -> Result<CommentRecord, SyncError> {
        let payload = CommentCreate {
            body_md: body.to_string(),
            parent_id,
        };
        let out: CommentNodeOut = self
            .request(
                Method::POST,
                &format!("posts/{post_id}/comments"),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(comment_from(out))
    }

    #[instrument(skip(self, body), target = "boardsync::infra::remote")]
    async fn update_comment(&self, id: CommentId, body: &str) -> Result<CommentRecord, SyncError> {
        let payload = CommentUpdate {
            body_md: body.to_string(),
        };
        let out: CommentNodeOut = self
            .request(Method::PUT, &format!("comments/{id}"), &[], Some(&payload))
            .await?;
        Ok(comment_from(out))
    }

    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn delete_comment(&self, id: CommentId) -> Result<(), SyncError> {
        let out: MessageOut = self
            .request(Method::DELETE, &format!("comments/{id}"), &[], None::<&()>)
            .await?;
        debug!(target: TARGET, message = %out.message, "comment deleted");
        Ok(())
    }

    #[instrument(skip(self, draft), target = "boardsync::infra::remote", fields(slug = %draft.slug))]
    async fn create_board(&self, draft: &BoardDraft) -> Result<Board, SyncError> {
        let payload = BoardCreate {
            name: draft.name.clone(),
            description: draft.description.clone(),
            slug: draft.slug.clone(),
        };
        let out: BoardOut = self
            .request(Method::POST, "admin/boards", &[], Some(&payload))
            .await?;
        Ok(board_from(out))
    }

    #[instrument(skip(self, changes), target = "boardsync::infra::remote")]
    async fn update_board(&self, id: BoardId, changes: &BoardChanges) -> Result<Board, SyncError> {
        let payload = BoardUpdate {
            name: changes.name.clone(),
            description: changes.description.clone(),
            slug: changes.slug.clone(),
        };
        let out: BoardOut = self
            .request(
                Method::PATCH,
                &format!("admin/boards/{id}"),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(board_from(out))
    }

    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn delete_board(&self, id: BoardId) -> Result<(), SyncError> {
        self.send(
            Method::DELETE,
            &format!("admin/boards/{id}"),
            &[],
            None::<&()>,
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, draft), target = "boardsync::infra::remote")]
    async fn create_post(&self, board: &str, draft: &PostDraft) -> Result<PostDetail, SyncError> {
        let payload = PostWrite {
            title: draft.title.clone(),
            body_md: draft.body_md.clone(),
        };
        let out: PostDetailOut = self
            .request(
                Method::POST,
                &format!("boards/{board}/posts"),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(detail_from(out))
    }

    #[instrument(skip(self, draft), target = "boardsync::infra::remote")]
    async fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<PostDetail, SyncError> {
        let payload = PostWrite {
            title: draft.title.clone(),
            body_md: draft.body_md.clone(),
        };
        let out: PostDetailOut = self
            .request(Method::PUT, &format!("posts/{id}"), &[], Some(&payload))
            .await?;
        Ok(detail_from(out))
    }

    #[instrument(skip(self), target = "boardsync::infra::remote")]
    async fn delete_post(&self, id: PostId) -> Result<(), SyncError> {
        self.send(Method::DELETE, &format!("posts/{id}"), &[], None::<&()>)
            .await
            .map(|_| ())
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::network("request timed out")
    } else {
        SyncError::network(err.to_string())
    }
}

/// Map a non-success response onto the error taxonomy.
pub(crate) fn classify(status: StatusCode, body: &[u8]) -> SyncError {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .map(|body| body.message())
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    let message = if detail.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        detail
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::auth(message),
        StatusCode::NOT_FOUND => SyncError::not_found(message),
        StatusCode::CONFLICT => SyncError::conflict(message),
        StatusCode::BAD_REQUEST if is_duplicate_slug(&message) => SyncError::conflict(message),
        StatusCode::TOO_MANY_REQUESTS => SyncError::network(message),
        status if status.is_server_error() => SyncError::network(message),
        status if status.is_client_error() => SyncError::validation(message),
        _ => SyncError::network(format!("unexpected status {status}: {message}")),
    }
}

fn is_duplicate_slug(message: &str) -> bool {
    let lowered = message.to_lowercase();
    DUPLICATE_SLUG_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Unnest server comment threads into records, parents before their replies.
pub(crate) fn flatten_comments(nodes: Vec<CommentNodeOut>) -> Vec<CommentRecord> {
    let mut records = Vec::new();
    let mut stack: Vec<CommentNodeOut> = nodes.into_iter().rev().collect();
    while let Some(mut node) = stack.pop() {
        let children = std::mem::take(&mut node.children);
        stack.extend(children.into_iter().rev());
        records.push(comment_from(node));
    }
    records
}

fn author_from(user: UserPublic) -> Author {
    Author {
        id: user.id,
        nickname: user.nickname,
        is_admin: user.is_admin,
    }
}

fn board_from(out: BoardOut) -> Board {
    Board {
        id: out.id,
        name: out.name,
        description: out.description,
        slug: out.slug,
        created_at: out.created_at,
    }
}

fn og_from(url: Option<String>, title: Option<String>, image: Option<String>) -> Option<OgPreview> {
    url.filter(|url| !url.is_empty())
        .map(|url| OgPreview { url, title, image })
}

fn excerpt_of(excerpt: String, body_md: &str) -> String {
    if !excerpt.is_empty() {
        return excerpt;
    }
    let trimmed = body_md.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn summary_from(item: PostListItem) -> PostSummary {
    let excerpt = excerpt_of(item.excerpt, &item.body_md);
    PostSummary {
        id: item.id,
        board_slug: item.board_slug,
        title: item.title,
        excerpt,
        like_count: item.like_count,
        view_count: item.view_count,
        liked_by_me: item.liked_by_me,
        search_snippet: item.search_snippet,
        og: og_from(item.og_url, item.og_title, item.og_image),
        author: author_from(item.author),
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

fn detail_from(out: PostDetailOut) -> PostDetail {
    PostDetail {
        id: out.id,
        board_slug: out.board_slug,
        title: out.title,
        body_md: out.body_md,
        like_count: out.like_count,
        view_count: out.view_count,
        liked_by_me: out.liked_by_me,
        og: og_from(out.og_url, out.og_title, out.og_image),
        author: author_from(out.author),
        created_at: out.created_at,
        updated_at: out.updated_at,
    }
}

fn comment_from(node: CommentNodeOut) -> CommentRecord {
    CommentRecord {
        id: node.id,
        post_id: node.post_id,
        parent_id: node.parent_id,
        body: node.body_md,
        author: author_from(node.author),
        created_at: node.created_at,
        updated_at: node.updated_at,
        is_deleted: node.is_deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent_id: Option<i64>, children: Vec<CommentNodeOut>) -> CommentNodeOut {
        let at = time::macros::datetime!(2024-03-01 10:00 UTC);
        CommentNodeOut {
            id,
            post_id: 1,
            parent_id,
            body_md: format!("comment {id}"),
            is_deleted: false,
            created_at: at,
            updated_at: at,
            author: UserPublic {
                id: 1,
                nickname: "kim".to_string(),
                is_admin: false,
            },
            children,
        }
    }

    #[test]
    fn nested_threads_flatten_parents_first() {
        let tree = vec![
            node(1, None, vec![node(2, Some(1), vec![node(4, Some(2), vec![])])]),
            node(3, None, vec![]),
        ];

        let ids: Vec<_> = flatten_comments(tree).iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        use crate::domain::error::ErrorKind;

        let cases = [
            (StatusCode::UNAUTHORIZED, ErrorKind::Auth),
            (StatusCode::FORBIDDEN, ErrorKind::Auth),
            (StatusCode::NOT_FOUND, ErrorKind::NotFound),
            (StatusCode::CONFLICT, ErrorKind::Conflict),
            (StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::Validation),
            (StatusCode::BAD_REQUEST, ErrorKind::Validation),
            (StatusCode::TOO_MANY_REQUESTS, ErrorKind::Network),
            (StatusCode::BAD_GATEWAY, ErrorKind::Network),
        ];
        for (status, kind) in cases {
            assert_eq!(classify(status, b"{\"detail\":\"x\"}").kind(), kind, "{status}");
        }
    }

    #[test]
    fn duplicate_slug_is_a_conflict() {
        let body = "{\"detail\":\"슬러그가 이미 존재합니다.\"}".as_bytes();
        let err = classify(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, SyncError::Conflict { .. }));
        assert_eq!(err.message(), "슬러그가 이미 존재합니다.");
    }

    #[test]
    fn empty_error_body_falls_back_to_reason() {
        let err = classify(StatusCode::NOT_FOUND, b"");
        assert_eq!(err.message(), "Not Found");
    }

    #[test]
    fn missing_excerpt_is_cut_from_body() {
        let body = "x".repeat(200);
        let excerpt = excerpt_of(String::new(), &body);
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 1);
        assert_eq!(excerpt_of("given".to_string(), &body), "given");
    }
}
