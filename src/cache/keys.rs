//! Cache key definitions.
//!
//! A `CacheKey` names one cached view of server state. Filters are normalized
//! on construction, so keys built from the same logical filters compare equal
//! and hash identically no matter how the caller assembled them.

use std::collections::BTreeMap;
use std::fmt;

use crate::application::client::PostListFilter;
use crate::application::pagination::PageCursor;
use crate::domain::entities::PostId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    BoardList,
    PostList,
    PostDetail,
    CommentList,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::BoardList => "board_list",
            ResourceKind::PostList => "post_list",
            ResourceKind::PostDetail => "post_detail",
            ResourceKind::CommentList => "comment_list",
        }
    }
}

/// What slice of the server a key covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    /// A board, by slug.
    Board(String),
    Post(PostId),
}

impl Scope {
    /// Board scope; slugs are trimmed and lowercased the way the server stores them.
    pub fn board(slug: &str) -> Self {
        Scope::Board(slug.trim().to_lowercase())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("*"),
            Scope::Board(slug) => write!(f, "board/{slug}"),
            Scope::Post(id) => write!(f, "post/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    kind: ResourceKind,
    scope: Scope,
    filters: BTreeMap<String, String>,
    page: Option<PageCursor>,
}

impl CacheKey {
    /// Build a key from raw filter dimensions.
    ///
    /// Dimension names are trimmed and lowercased, values are trimmed, and
    /// dimensions whose value ends up empty are dropped. Later duplicates of
    /// a dimension name replace earlier ones.
    pub fn derive<I, K, V>(kind: ResourceKind, scope: Scope, filters: I, page: Option<PageCursor>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let filters = filters
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.as_ref().trim().to_ascii_lowercase();
                let value = value.as_ref().trim();
                (!name.is_empty() && !value.is_empty()).then(|| (name, value.to_string()))
            })
            .collect();

        Self {
            kind,
            scope,
            filters,
            page,
        }
    }

    pub fn board_list() -> Self {
        Self::derive(ResourceKind::BoardList, Scope::Global, no_filters(), None)
    }

    /// Accumulated post list of a board under `filter`.
    pub fn post_list(board: &str, filter: &PostListFilter) -> Self {
        Self::derive(
            ResourceKind::PostList,
            Scope::board(board),
            filter.dimensions(),
            None,
        )
    }

    pub fn post_detail(id: PostId) -> Self {
        Self::derive(ResourceKind::PostDetail, Scope::Post(id), no_filters(), None)
    }

    pub fn comment_list(post_id: PostId) -> Self {
        Self::derive(ResourceKind::CommentList, Scope::Post(post_id), no_filters(), None)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn page(&self) -> Option<PageCursor> {
        self.page
    }

    /// Stable textual form, e.g. `post_list:board/general?q=rust&sort=likes`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.scope)?;
        for (index, (name, value)) in self.filters.iter().enumerate() {
            let sep = if index == 0 { '?' } else { '&' };
            write!(f, "{sep}{}={}", escape(name), escape(value))?;
        }
        if let Some(page) = self.page {
            write!(f, "#{page}")?;
        }
        Ok(())
    }
}

fn no_filters() -> [(&'static str, &'static str); 0] {
    []
}

// Keeps the canonical form unambiguous when values contain separators.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' | '&' | '=' | '#' | '?' => out.push_str(&format!("%{:02X}", ch as u32)),
            other => out.push(other),
        }
    }
    out
}

/// Predicate over keys used for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Exact(CacheKey),
    /// Every key of a kind, any scope and filters.
    Kind(ResourceKind),
    /// Every key of a kind within one scope, any filters or page.
    KindScope(ResourceKind, Scope),
}

impl KeyPattern {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyPattern::Exact(expected) => expected == key,
            KeyPattern::Kind(kind) => key.kind == *kind,
            KeyPattern::KindScope(kind, scope) => key.kind == *kind && key.scope == *scope,
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(key) => write!(f, "{key}"),
            KeyPattern::Kind(kind) => write!(f, "{}:**", kind.as_str()),
            KeyPattern::KindScope(kind, scope) => write!(f, "{}:{scope}?*", kind.as_str()),
        }
    }
}
