//! Maps a cache key onto the `ResourceClient` call that fills it.

use crate::application::client::{PostListFilter, ResourceClient};
use crate::application::pagination::{PageCursor, PageRequest, PaginatedCollection};
use crate::domain::comments::CommentForest;
use crate::domain::error::SyncError;

use super::entry::CachedValue;
use super::keys::{CacheKey, ResourceKind, Scope};

/// Fetch the value for `key` from scratch.
///
/// Post lists start from the key's page cursor (the first page when the key
/// has none) and come back as a fresh collection.
pub(crate) async fn load(
    client: &dyn ResourceClient,
    key: &CacheKey,
    page_limit: u32,
) -> Result<CachedValue, SyncError> {
    match (key.kind(), key.scope()) {
        (ResourceKind::BoardList, _) => client.list_boards().await.map(CachedValue::Boards),
        (ResourceKind::PostList, Scope::Board(board)) => {
            let filter = PostListFilter::from_key(key);
            let cursor = key.page().unwrap_or(PageCursor::START);
            let page = client
                .list_posts(board, &filter, PageRequest::new(page_limit, cursor))
                .await?;
            Ok(CachedValue::Posts(PaginatedCollection::from_first_page(page)))
        }
        (ResourceKind::PostDetail, Scope::Post(id)) => client.get_post(*id).await.map(CachedValue::Post),
        (ResourceKind::CommentList, Scope::Post(id)) => {
            let records = client.list_comments(*id).await?;
            Ok(CachedValue::Comments(CommentForest::build(records)))
        }
        _ => Err(SyncError::validation(format!(
            "cache key {key} has no fetchable scope"
        ))),
    }
}
