//! Comment threads held as a forest with an id index.
//!
//! Nodes live in a map keyed by id and refer to their children by id, so
//! every lookup is O(1) and no walk over the forest recurses.

use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;
use tracing::warn;

use crate::domain::entities::{Author, CommentId, CommentRecord};
use crate::domain::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub body: String,
    pub author: Author,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub is_deleted: bool,
    pub edited: bool,
    /// Ordered by creation time ascending after `build`; later inserts append.
    pub children: Vec<CommentId>,
}

impl CommentNode {
    fn from_record(record: CommentRecord) -> Self {
        let edited = !record.is_deleted && record.updated_at > record.created_at;
        Self {
            id: record.id,
            parent_id: record.parent_id,
            body: if record.is_deleted {
                String::new()
            } else {
                record.body
            },
            author: record.author,
            created_at: record.created_at,
            updated_at: record.updated_at,
            is_deleted: record.is_deleted,
            edited,
            children: Vec::new(),
        }
    }
}

/// What `delete_node` did to the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The node had replies and was kept as a tombstone.
    Tombstoned,
    /// The node was a leaf and is gone.
    Removed,
}

/// A node paired with its nesting depth, in display order.
#[derive(Debug, Clone, Copy)]
pub struct ThreadEntry<'a> {
    pub depth: usize,
    pub node: &'a CommentNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentForest {
    nodes: HashMap<CommentId, CommentNode>,
    roots: Vec<CommentId>,
}

impl CommentForest {
    /// Thread a flat list of records.
    ///
    /// Records whose parent is missing (or that only reach each other through a
    /// parent cycle) become roots instead of being dropped. Duplicate ids keep
    /// the first record.
    pub fn build(records: Vec<CommentRecord>) -> Self {
        let mut nodes: HashMap<CommentId, CommentNode> = HashMap::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());

        for record in records {
            if nodes.contains_key(&record.id) {
                warn!(comment_id = record.id, "Duplicate comment id ignored");
                continue;
            }
            order.push(record.id);
            nodes.insert(record.id, CommentNode::from_record(record));
        }

        let mut roots = Vec::new();
        for &id in &order {
            let parent = nodes.get(&id).and_then(|node| node.parent_id);
            match parent {
                Some(parent_id) if parent_id != id && nodes.contains_key(&parent_id) => {
                    if let Some(parent) = nodes.get_mut(&parent_id) {
                        parent.children.push(id);
                    }
                }
                Some(parent_id) => {
                    warn!(
                        comment_id = id,
                        parent_id, "Comment parent missing from thread; treating as root"
                    );
                    if let Some(node) = nodes.get_mut(&id) {
                        node.parent_id = None;
                    }
                    roots.push(id);
                }
                None => roots.push(id),
            }
        }

        let mut forest = Self { nodes, roots };
        forest.promote_unreachable(&order);
        forest.sort_children(&order);
        forest
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: CommentId) -> Option<&CommentNode> {
        self.nodes.get(&id)
    }

    pub fn roots(&self) -> &[CommentId] {
        &self.roots
    }

    pub fn children_of(&self, id: CommentId) -> &[CommentId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Append a new top-level comment.
    pub fn insert_root(&mut self, record: CommentRecord) -> Result<(), SyncError> {
        self.ensure_free(record.id)?;
        let mut node = CommentNode::from_record(record);
        node.parent_id = None;
        self.roots.push(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Append `record` as the last child of `parent_id`.
    ///
    /// Fails without touching the forest when the parent is unknown.
    pub fn insert_reply(
        &mut self,
        parent_id: CommentId,
        record: CommentRecord,
    ) -> Result<(), SyncError> {
        if !self.nodes.contains_key(&parent_id) {
            return Err(SyncError::not_found(format!(
                "parent comment {parent_id} is not in this thread"
            )));
        }
        self.ensure_free(record.id)?;

        let mut node = CommentNode::from_record(record);
        node.parent_id = Some(parent_id);
        let id = node.id;
        self.nodes.insert(id, node);
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.push(id);
        }
        Ok(())
    }

    pub fn update_body(&mut self, id: CommentId, body: impl Into<String>) -> Result<(), SyncError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found(format!("comment {id} is not in this thread")))?;
        if node.is_deleted {
            return Err(SyncError::validation(format!(
                "comment {id} has been deleted"
            )));
        }
        node.body = body.into();
        node.edited = true;
        Ok(())
    }

    /// Delete a comment.
    ///
    /// A comment with replies becomes a tombstone (flagged deleted, body
    /// cleared) so the replies keep their parent. A leaf is unlinked and
    /// dropped.
    pub fn delete_node(&mut self, id: CommentId) -> Result<DeleteOutcome, SyncError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found(format!("comment {id} is not in this thread")))?;

        if !node.children.is_empty() {
            node.is_deleted = true;
            node.body.clear();
            return Ok(DeleteOutcome::Tombstoned);
        }

        let parent_id = node.parent_id;
        self.nodes.remove(&id);
        match parent_id.and_then(|parent_id| self.nodes.get_mut(&parent_id)) {
            Some(parent) => parent.children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
        Ok(DeleteOutcome::Removed)
    }

    /// Swap a locally-created node for the record the server assigned.
    ///
    /// The node keeps its position and any replies; only its identity and
    /// content change.
    pub fn replace_node(
        &mut self,
        local_id: CommentId,
        record: CommentRecord,
    ) -> Result<(), SyncError> {
        if !self.nodes.contains_key(&local_id) {
            return Err(SyncError::not_found(format!(
                "comment {local_id} is not in this thread"
            )));
        }
        if record.id != local_id {
            self.ensure_free(record.id)?;
        }

        let Some(mut previous) = self.nodes.remove(&local_id) else {
            return Err(SyncError::not_found(format!(
                "comment {local_id} is not in this thread"
            )));
        };

        let mut node = CommentNode::from_record(record);
        node.parent_id = previous.parent_id;
        node.children = std::mem::take(&mut previous.children);
        let new_id = node.id;

        for child in &node.children {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parent_id = Some(new_id);
            }
        }

        let siblings = match node.parent_id.and_then(|parent| self.nodes.get_mut(&parent)) {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        };
        if let Some(slot) = siblings.iter_mut().find(|sibling| **sibling == local_id) {
            *slot = new_id;
        }

        self.nodes.insert(new_id, node);
        Ok(())
    }

    /// Depth-first display order, each node tagged with its depth.
    pub fn flatten(&self) -> Vec<ThreadEntry<'_>> {
        let mut entries = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(CommentId, usize)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            entries.push(ThreadEntry { depth, node });
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }

        entries
    }

    fn ensure_free(&self, id: CommentId) -> Result<(), SyncError> {
        if self.nodes.contains_key(&id) {
            return Err(SyncError::conflict(format!(
                "comment {id} already exists in this thread"
            )));
        }
        Ok(())
    }

    /// Nodes caught in a parent cycle are never reached from a root; cut each
    /// such cycle at its first node in arrival order.
    fn promote_unreachable(&mut self, order: &[CommentId]) {
        let mut reached: HashSet<CommentId> = HashSet::with_capacity(self.nodes.len());
        let mut stack: Vec<CommentId> = self.roots.clone();
        self.mark_reached(&mut stack, &mut reached);

        for &id in order {
            if reached.contains(&id) {
                continue;
            }
            let parent_id = self.nodes.get(&id).and_then(|node| node.parent_id);
            if let Some(parent) = parent_id.and_then(|parent| self.nodes.get_mut(&parent)) {
                parent.children.retain(|child| *child != id);
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.parent_id = None;
            }
            warn!(comment_id = id, "Comment cycle detected; treating as root");
            self.roots.push(id);
            stack.push(id);
            self.mark_reached(&mut stack, &mut reached);
        }
    }

    fn mark_reached(&self, stack: &mut Vec<CommentId>, reached: &mut HashSet<CommentId>) {
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().copied());
            }
        }
    }

    fn sort_children(&mut self, order: &[CommentId]) {
        for &id in order {
            let Some(mut children) = self.nodes.get_mut(&id).map(|node| std::mem::take(&mut node.children))
            else {
                continue;
            };
            children.sort_by_key(|child| self.order_key(*child));
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children = children;
            }
        }

        let mut roots = std::mem::take(&mut self.roots);
        roots.sort_by_key(|root| self.order_key(*root));
        self.roots = roots;
    }

    fn order_key(&self, id: CommentId) -> (OffsetDateTime, CommentId) {
        let created_at = self
            .nodes
            .get(&id)
            .map(|node| node.created_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        (created_at, id)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::domain::error::ErrorKind;

    fn record(id: CommentId, parent_id: Option<CommentId>, minute: i64) -> CommentRecord {
        let created_at = OffsetDateTime::UNIX_EPOCH + Duration::minutes(minute);
        CommentRecord {
            id,
            post_id: 1,
            parent_id,
            body: format!("comment {id}"),
            author: Author {
                id: 10,
                nickname: "reader".to_string(),
                is_admin: false,
            },
            created_at,
            updated_at: created_at,
            is_deleted: false,
        }
    }

    #[test]
    fn build_orders_children_by_creation_time() {
        let forest = CommentForest::build(vec![
            record(1, None, 0),
            record(4, Some(1), 9),
            record(2, Some(1), 3),
            record(3, Some(1), 5),
            record(5, None, -1),
        ]);

        assert_eq!(forest.len(), 5);
        assert_eq!(forest.roots(), &[5, 1]);
        assert_eq!(forest.children_of(1), &[2, 3, 4]);
    }

    #[test]
    fn orphans_become_roots() {
        let forest = CommentForest::build(vec![record(1, None, 0), record(2, Some(99), 1)]);

        assert_eq!(forest.len(), 2);
        assert_eq!(forest.roots(), &[1, 2]);
        assert_eq!(forest.get(2).and_then(|node| node.parent_id), None);
    }

    #[test]
    fn parent_cycles_are_cut_not_dropped() {
        let forest = CommentForest::build(vec![
            record(1, None, 0),
            record(2, Some(3), 1),
            record(3, Some(2), 2),
        ]);

        assert_eq!(forest.len(), 3);
        assert_eq!(forest.flatten().len(), 3);
        assert!(forest.roots().contains(&2));
        assert_eq!(forest.children_of(2), &[3]);
    }

    #[test]
    fn insert_reply_into_missing_parent_leaves_forest_untouched() {
        let mut forest = CommentForest::build(vec![record(1, None, 0), record(2, Some(1), 1)]);
        let before = forest.clone();

        let err = forest
            .insert_reply(42, record(3, None, 2))
            .expect_err("unknown parent must fail");

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(forest, before);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn insert_reply_appends_last_child() {
        let mut forest = CommentForest::build(vec![record(1, None, 0), record(2, Some(1), 5)]);

        forest
            .insert_reply(1, record(3, None, 1))
            .expect("parent exists");

        assert_eq!(forest.children_of(1), &[2, 3]);
        assert_eq!(forest.get(3).and_then(|node| node.parent_id), Some(1));
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let mut forest = CommentForest::build(vec![record(1, None, 0)]);
        let err = forest
            .insert_root(record(1, None, 1))
            .expect_err("duplicate id");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn update_body_marks_edited_and_keeps_children() {
        let mut forest = CommentForest::build(vec![record(1, None, 0), record(2, Some(1), 1)]);

        forest.update_body(1, "rewritten").expect("comment exists");

        let node = forest.get(1).expect("node");
        assert_eq!(node.body, "rewritten");
        assert!(node.edited);
        assert_eq!(forest.children_of(1), &[2]);

        let err = forest.update_body(7, "nope").expect_err("missing comment");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn deleting_a_comment_with_replies_leaves_a_tombstone() {
        let mut forest = CommentForest::build(vec![
            record(1, None, 0),
            record(2, Some(1), 1),
            record(3, Some(1), 2),
        ]);

        let outcome = forest.delete_node(1).expect("comment exists");

        assert_eq!(outcome, DeleteOutcome::Tombstoned);
        let node = forest.get(1).expect("tombstone kept");
        assert!(node.is_deleted);
        assert!(node.body.is_empty());
        assert_eq!(forest.children_of(1), &[2, 3]);
        assert_eq!(forest.len(), 3);
    }

    #[test]
    fn deleting_a_leaf_unlinks_it() {
        let mut forest = CommentForest::build(vec![
            record(1, None, 0),
            record(2, Some(1), 1),
            record(3, Some(1), 2),
        ]);

        let outcome = forest.delete_node(3).expect("comment exists");

        assert_eq!(outcome, DeleteOutcome::Removed);
        assert!(!forest.contains(3));
        assert_eq!(forest.children_of(1), &[2]);

        assert_eq!(
            forest.delete_node(3).expect_err("already gone").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn deleting_a_root_leaf_removes_it_from_roots() {
        let mut forest = CommentForest::build(vec![record(1, None, 0), record(2, None, 1)]);
        forest.delete_node(1).expect("root exists");
        assert_eq!(forest.roots(), &[2]);
    }

    #[test]
    fn replace_node_keeps_position() {
        let mut forest = CommentForest::build(vec![
            record(1, None, 0),
            record(2, Some(1), 1),
            record(3, Some(1), 2),
        ]);
        forest
            .insert_reply(1, record(-1, None, 3))
            .expect("placeholder");

        let mut server = record(40, Some(1), 3);
        server.body = "from server".to_string();
        forest.replace_node(-1, server).expect("placeholder exists");

        assert_eq!(forest.children_of(1), &[2, 3, 40]);
        assert!(!forest.contains(-1));
        assert_eq!(forest.get(40).map(|node| node.body.as_str()), Some("from server"));
    }

    #[test]
    fn server_tombstones_arrive_without_body() {
        let mut deleted = record(1, None, 0);
        deleted.is_deleted = true;
        let forest = CommentForest::build(vec![deleted, record(2, Some(1), 1)]);

        let node = forest.get(1).expect("tombstone");
        assert!(node.is_deleted);
        assert!(node.body.is_empty());
    }

    #[test]
    fn flatten_walks_pathological_depth_without_recursion() {
        let depth = 50_000;
        let records: Vec<_> = (0..depth)
            .map(|id| record(id, if id == 0 { None } else { Some(id - 1) }, id))
            .collect();
        let forest = CommentForest::build(records);

        let entries = forest.flatten();
        assert_eq!(entries.len(), depth as usize);
        assert_eq!(entries.last().map(|entry| entry.depth), Some(depth as usize - 1));
    }

    #[test]
    fn flatten_is_depth_first_in_display_order() {
        let forest = CommentForest::build(vec![
            record(1, None, 0),
            record(2, Some(1), 1),
            record(3, Some(2), 2),
            record(4, None, 3),
        ]);

        let order: Vec<_> = forest
            .flatten()
            .iter()
            .map(|entry| (entry.node.id, entry.depth))
            .collect();
        assert_eq!(order, vec![(1, 0), (2, 1), (3, 2), (4, 0)]);
    }
}
