//! Offset pagination and infinite-scroll accumulation.

use std::collections::HashSet;
use std::fmt;

use crate::domain::entities::Identified;

/// Offset into a server-side listing; the first page starts at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageCursor(u32);

impl PageCursor {
    pub const START: PageCursor = PageCursor(0);

    pub fn new(offset: u32) -> Self {
        Self(offset)
    }

    pub fn offset(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub cursor: PageCursor,
}

impl PageRequest {
    pub fn new(limit: u32, cursor: PageCursor) -> Self {
        Self { limit, cursor }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(limit, PageCursor::START)
    }
}

/// One page as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<PageCursor>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None, false)
    }
}

/// Pages fetched under one cache key, merged into a single list.
///
/// Each item id appears at most once in `items`, at the position of its first
/// arrival. A collection belongs to exactly one key; a different filter set
/// gets a different key and therefore a fresh collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedCollection<T: Identified> {
    pages: Vec<Page<T>>,
    items: Vec<T>,
    seen: HashSet<T::Id>,
    next_cursor: Option<PageCursor>,
    has_more: bool,
}

impl<T: Identified + Clone> PaginatedCollection<T> {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            items: Vec::new(),
            seen: HashSet::new(),
            next_cursor: Some(PageCursor::START),
            has_more: true,
        }
    }

    pub fn from_first_page(page: Page<T>) -> Self {
        let mut collection = Self::new();
        collection.append_page(page);
        collection
    }

    /// Merge `page` into the collection and return how many items were new.
    pub fn append_page(&mut self, page: Page<T>) -> usize {
        let before = self.items.len();
        for item in &page.items {
            if self.seen.insert(item.id()) {
                self.items.push(item.clone());
            }
        }

        self.next_cursor = page.next_cursor.filter(|_| page.has_more);
        self.has_more = self.next_cursor.is_some();
        self.pages.push(page);
        self.items.len() - before
    }

    /// Drop every page and item, back to the state before the first fetch.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Whether a page fetched at `cursor` continues this collection.
    pub fn expects(&self, cursor: PageCursor) -> bool {
        self.next_cursor == Some(cursor)
    }

    /// Apply `update` to every stored copy of the item with `id`.
    ///
    /// Returns false when no such item has been accumulated.
    pub fn update_item(&mut self, id: &T::Id, mut update: impl FnMut(&mut T)) -> bool {
        if !self.seen.contains(id) {
            return false;
        }
        for item in self.items.iter_mut().filter(|item| &item.id() == id) {
            update(item);
        }
        for page in &mut self.pages {
            for item in page.items.iter_mut().filter(|item| &item.id() == id) {
                update(item);
            }
        }
        true
    }

    pub fn find(&self, id: &T::Id) -> Option<&T> {
        self.items.iter().find(|item| &item.id() == id)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.next_cursor
    }
}

impl<T: Identified + Clone> Default for PaginatedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}
