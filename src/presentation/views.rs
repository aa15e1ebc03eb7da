use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

use crate::application::feed::{LoadMore, MutationResult};
use crate::application::pagination::PaginatedCollection;
use crate::cache::{CacheEntry, CachedValue, EntryStatus};
use crate::domain::comments::{CommentForest, DeleteOutcome};
use crate::domain::entities::{Board, PostDetail, PostSummary};

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");
const INDENT: &str = "  ";
const DELETED_BODY: &str = "[deleted]";

/// Turns cached server state into terminal output.
pub trait Renderer {
    fn boards(&self, boards: &[Board]) -> String;
    fn posts(&self, posts: &PaginatedCollection<PostSummary>) -> String;
    fn post(&self, post: &PostDetail) -> String;
    fn comments(&self, forest: &CommentForest) -> String;
    fn mutation(&self, result: &MutationResult) -> String;

    /// Render whatever an entry holds, falling back to its status.
    fn entry(&self, entry: &CacheEntry) -> String {
        match (&entry.value, entry.status) {
            (Some(CachedValue::Boards(boards)), _) => self.boards(boards),
            (Some(CachedValue::Posts(posts)), _) => self.posts(posts),
            (Some(CachedValue::Post(post)), _) => self.post(post),
            (Some(CachedValue::Comments(forest)), _) => self.comments(forest),
            (None, EntryStatus::Error) => entry
                .error
                .as_ref()
                .map(|err| format!("error: {err}"))
                .unwrap_or_else(|| "error".to_string()),
            (None, status) => status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl TextRenderer {
    pub fn load_more(&self, outcome: &LoadMore) -> String {
        match outcome {
            LoadMore::Appended { added } => format!("loaded {added} more"),
            LoadMore::Exhausted => "no more posts".to_string(),
            LoadMore::Discarded => "page dropped: the list changed meanwhile".to_string(),
        }
    }
}

impl Renderer for TextRenderer {
    fn boards(&self, boards: &[Board]) -> String {
        if boards.is_empty() {
            return "no boards".to_string();
        }
        boards
            .iter()
            .map(|board| {
                let mut line = format!("#{:<4} {:<16} {}", board.id, board.slug, board.name);
                if !board.description.is_empty() {
                    line.push_str(" - ");
                    line.push_str(&board.description);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn posts(&self, posts: &PaginatedCollection<PostSummary>) -> String {
        let mut lines: Vec<String> = posts
            .items()
            .iter()
            .map(|post| {
                let heart = if post.liked_by_me { "♥" } else { "♡" };
                let mut line = format!(
                    "#{:<5} {} {} {:>3}  views {:>4}  {}  by {}",
                    post.id,
                    stamp(post.created_at),
                    heart,
                    post.like_count,
                    post.view_count,
                    post.title,
                    post.author.nickname,
                );
                let teaser = post.search_snippet.as_deref().unwrap_or(&post.excerpt);
                if !teaser.is_empty() {
                    line.push('\n');
                    line.push_str(INDENT);
                    line.push_str(teaser);
                }
                line
            })
            .collect();

        if lines.is_empty() {
            lines.push("no posts".to_string());
        }
        if let Some(cursor) = posts.next_cursor() {
            lines.push(format!("(more from offset {cursor})"));
        }
        lines.join("\n")
    }

    fn post(&self, post: &PostDetail) -> String {
        let heart = if post.liked_by_me { "♥" } else { "♡" };
        let mut lines = vec![
            format!("#{} [{}] {}", post.id, post.board_slug, post.title),
            format!(
                "by {} at {}  {} {}  views {}",
                post.author.nickname,
                stamp(post.created_at),
                heart,
                post.like_count,
                post.view_count
            ),
        ];
        if let Some(og) = &post.og {
            lines.push(format!(
                "link: {} {}",
                og.url,
                og.title.as_deref().unwrap_or_default()
            ));
        }
        lines.push(String::new());
        lines.push(post.body_md.clone());
        lines.join("\n")
    }

    fn comments(&self, forest: &CommentForest) -> String {
        if forest.is_empty() {
            return "no comments".to_string();
        }
        forest
            .flatten()
            .into_iter()
            .map(|entry| {
                let node = entry.node;
                let indent = INDENT.repeat(entry.depth);
                if node.is_deleted {
                    return format!("{indent}{DELETED_BODY}");
                }
                let edited = if node.edited { " (edited)" } else { "" };
                format!(
                    "{indent}#{} {} at {}{}: {}",
                    node.id,
                    node.author.nickname,
                    stamp(node.created_at),
                    edited,
                    node.body
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn mutation(&self, result: &MutationResult) -> String {
        match result {
            MutationResult::Liked(state) => {
                let verb = if state.liked { "liked" } else { "unliked" };
                format!("{verb} ({} likes)", state.like_count)
            }
            MutationResult::CommentCreated(record) => format!("comment #{} added", record.id),
            MutationResult::CommentUpdated(record) => format!("comment #{} updated", record.id),
            MutationResult::CommentDeleted(DeleteOutcome::Removed) => "comment deleted".to_string(),
            MutationResult::CommentDeleted(DeleteOutcome::Tombstoned) => {
                "comment deleted; replies kept".to_string()
            }
            MutationResult::BoardSaved(board) => format!("board #{} {} saved", board.id, board.slug),
            MutationResult::BoardDeleted => "board deleted".to_string(),
            MutationResult::PostSaved(post) => format!("post #{} saved", post.id),
            MutationResult::PostDeleted => "post deleted".to_string(),
        }
    }
}

fn stamp(at: OffsetDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).unwrap_or_else(|_| at.to_string())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::entities::{Author, CommentRecord};

    fn record(id: i64, parent_id: Option<i64>, is_deleted: bool) -> CommentRecord {
        CommentRecord {
            id,
            post_id: 1,
            parent_id,
            body: format!("body {id}"),
            author: Author {
                id: 7,
                nickname: "lee".to_string(),
                is_admin: false,
            },
            created_at: datetime!(2024-03-01 10:00 UTC),
            updated_at: datetime!(2024-03-01 10:00 UTC),
            is_deleted,
        }
    }

    #[test]
    fn comment_threads_indent_by_depth() {
        let forest = CommentForest::build(vec![
            record(1, None, true),
            record(2, Some(1), false),
            record(3, None, false),
        ]);

        let text = TextRenderer.comments(&forest);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "[deleted]");
        assert_eq!(lines[1], "  #2 lee at 2024-03-01 10:00: body 2");
        assert!(lines[2].starts_with("#3 "));
    }

    #[test]
    fn errored_entry_shows_its_error() {
        let entry = CacheEntry {
            status: EntryStatus::Error,
            value: None,
            error: Some(crate::domain::error::SyncError::not_found("post 9")),
            version: 1,
            stale: false,
        };
        assert_eq!(TextRenderer.entry(&entry), "error: not found: post 9");
    }
}
