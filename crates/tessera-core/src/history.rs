//! Undo/redo history with re-entrant batches.
//!
//! Entries hold paired actions: the `redo` action is the list of changes as
//! they happened, the `undo` action is their inverses in reverse order. Both
//! carry the selection to restore, so replay never has to re-derive state.
//!
//! A batch collects changes until the outermost `end_batch`; nesting only
//! moves a depth counter. Rolling back a level (error or `committed = false`)
//! reverts exactly the changes recorded since that level began.

use crate::element::ElementId;
use crate::selection::SelectionManager;
use crate::store::{Change, ElementStore};
use std::collections::VecDeque;

#[cfg(not(target_arch = "wasm32"))]
use std::time::SystemTime;

#[cfg(target_arch = "wasm32")]
use web_time::SystemTime;

/// One side of a history entry.
#[derive(Debug, Clone)]
pub struct HistoryAction {
    /// Changes to apply, in order.
    pub changes: Vec<Change>,
    /// Selection after the action is applied.
    pub selection: Vec<ElementId>,
}

/// An immutable, reversible unit of edit.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    label: String,
    timestamp: SystemTime,
    undo: HistoryAction,
    redo: HistoryAction,
}

impl HistoryEntry {
    /// Build an entry from the forward changes and the selections on either
    /// side of them.
    pub fn new(
        label: impl Into<String>,
        changes: Vec<Change>,
        selection_before: Vec<ElementId>,
        selection_after: Vec<ElementId>,
    ) -> Self {
        let inverse = changes.iter().rev().map(Change::inverse).collect();
        Self {
            label: label.into(),
            timestamp: SystemTime::now(),
            undo: HistoryAction {
                changes: inverse,
                selection: selection_before,
            },
            redo: HistoryAction {
                changes,
                selection: selection_after,
            },
        }
    }

    /// Label shown in undo/redo menus.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// When the entry was created.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Changes and selection that revert this entry.
    pub fn undo_action(&self) -> &HistoryAction {
        &self.undo
    }

    /// Changes and selection that re-apply this entry.
    pub fn redo_action(&self) -> &HistoryAction {
        &self.redo
    }
}

/// What the history engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    Idle,
    Batching { depth: usize },
    Undoing,
    Redoing,
}

/// Result of closing a batch level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// An inner level closed; the outer batch is still open.
    Nested,
    /// The outermost level closed and one entry was pushed.
    Committed,
    /// The outermost level closed without any changes.
    Empty,
    /// Changes of the closed level were reverted. `selection` is the
    /// selection the level was opened with.
    RolledBack {
        reverted: Vec<ElementId>,
        selection: Vec<ElementId>,
    },
    /// `end_batch` without a matching `begin_batch`.
    NotOpen,
}

/// One nesting level of an open batch.
#[derive(Debug)]
struct BatchLevel {
    /// Start offset into the batch's `changes`.
    start: usize,
    selection: Vec<ElementId>,
}

#[derive(Debug)]
struct OpenBatch {
    label: String,
    changes: Vec<Change>,
    levels: Vec<BatchLevel>,
}

/// Linear undo/redo history with a bounded past stack.
#[derive(Debug)]
pub struct HistoryEngine {
    past: VecDeque<HistoryEntry>,
    future: Vec<HistoryEntry>,
    limit: usize,
    batch: Option<OpenBatch>,
    replaying: Option<HistoryState>,
}

impl HistoryEngine {
    /// Create an empty history keeping at most `limit` undo entries.
    pub fn new(limit: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            limit: limit.max(1),
            batch: None,
            replaying: None,
        }
    }

    /// Current state: idle, batching, or replaying.
    pub fn state(&self) -> HistoryState {
        if let Some(state) = self.replaying {
            return state;
        }
        match &self.batch {
            Some(batch) => HistoryState::Batching {
                depth: batch.levels.len(),
            },
            None => HistoryState::Idle,
        }
    }

    /// Nesting depth of the open batch, 0 when none is open.
    pub fn depth(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.levels.len())
    }

    /// True while a replayed mutation must not record itself.
    pub fn is_replaying(&self) -> bool {
        self.replaying.is_some()
    }

    /// Open a batch level. Only the outermost label is kept.
    pub fn begin_batch(&mut self, label: impl Into<String>, selection: &SelectionManager) {
        let level = |start| BatchLevel {
            start,
            selection: selection.ids(),
        };
        match &mut self.batch {
            Some(batch) => batch.levels.push(level(batch.changes.len())),
            None => {
                let label = label.into();
                log::trace!("history: open batch '{}'", label);
                self.batch = Some(OpenBatch {
                    label,
                    changes: Vec::new(),
                    levels: vec![level(0)],
                });
            }
        }
    }

    /// Append a change to the open batch. Ignored while replaying or when no
    /// batch is open; returns whether it was captured.
    pub fn record_change(&mut self, change: Change) -> bool {
        if self.replaying.is_some() {
            return false;
        }
        match &mut self.batch {
            Some(batch) => {
                batch.changes.push(change);
                true
            }
            None => false,
        }
    }

    /// Close a batch level. With `committed = false` the level's changes are
    /// reverted on `store` and the caller gets back the selection to restore;
    /// only the outermost commit pushes an entry.
    pub fn end_batch(
        &mut self,
        committed: bool,
        store: &mut ElementStore,
        selection: &SelectionManager,
    ) -> BatchOutcome {
        let Some(batch) = &mut self.batch else {
            log::warn!("history: end_batch without an open batch");
            return BatchOutcome::NotOpen;
        };
        let Some(level) = batch.levels.pop() else {
            self.batch = None;
            return BatchOutcome::NotOpen;
        };
        let outcome = if committed {
            None
        } else {
            let reverted: Vec<Change> = batch.changes.drain(level.start..).collect();
            let mut ids = Vec::new();
            for change in reverted.iter().rev() {
                store.apply(&change.inverse());
                ids.extend(change.touched_ids());
            }
            Some(BatchOutcome::RolledBack {
                reverted: ids,
                selection: level.selection.clone(),
            })
        };
        if !batch.levels.is_empty() {
            return outcome.unwrap_or(BatchOutcome::Nested);
        }

        let Some(batch) = self.batch.take() else {
            return BatchOutcome::NotOpen;
        };
        if let Some(outcome) = outcome {
            log::debug!("history: discarded batch '{}'", batch.label);
            return outcome;
        }
        if batch.changes.is_empty() {
            return BatchOutcome::Empty;
        }
        log::debug!(
            "history: commit '{}' ({} changes)",
            batch.label,
            batch.changes.len()
        );
        self.push(HistoryEntry::new(
            batch.label,
            batch.changes,
            level.selection,
            selection.ids(),
        ));
        BatchOutcome::Committed
    }

    /// Push a prebuilt entry, discarding the redo branch.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.future.clear();
        self.past.push_back(entry);
        while self.past.len() > self.limit {
            self.past.pop_front();
        }
    }

    /// Build and push an entry in one step.
    pub fn record(
        &mut self,
        label: impl Into<String>,
        changes: Vec<Change>,
        selection_before: Vec<ElementId>,
        selection_after: Vec<ElementId>,
    ) {
        if changes.is_empty() {
            return;
        }
        self.push(HistoryEntry::new(label, changes, selection_before, selection_after));
    }

    /// Revert the most recent entry. Returns `false` when there is nothing
    /// to undo or a batch is still open.
    pub fn undo(&mut self, store: &mut ElementStore, selection: &mut SelectionManager) -> bool {
        if self.batch.is_some() {
            log::warn!("history: undo ignored while a batch is open");
            return false;
        }
        let Some(entry) = self.past.pop_back() else {
            return false;
        };
        self.replay(HistoryState::Undoing, &entry.undo, store, selection);
        log::debug!("history: undo '{}'", entry.label);
        self.future.push(entry);
        true
    }

    /// Re-apply the most recently undone entry.
    pub fn redo(&mut self, store: &mut ElementStore, selection: &mut SelectionManager) -> bool {
        if self.batch.is_some() {
            log::warn!("history: redo ignored while a batch is open");
            return false;
        }
        let Some(entry) = self.future.pop() else {
            return false;
        };
        self.replay(HistoryState::Redoing, &entry.redo, store, selection);
        log::debug!("history: redo '{}'", entry.label);
        self.past.push_back(entry);
        true
    }

    fn replay(
        &mut self,
        state: HistoryState,
        action: &HistoryAction,
        store: &mut ElementStore,
        selection: &mut SelectionManager,
    ) {
        self.replaying = Some(state);
        for change in &action.changes {
            store.apply(change);
        }
        selection.set_selection(
            action
                .selection
                .iter()
                .filter(|id| store.contains(id))
                .cloned(),
        );
        self.replaying = None;
    }

    /// Check if undo is available.
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    /// Check if redo is available.
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Label of the entry `undo` would revert.
    pub fn undo_label(&self) -> Option<&str> {
        self.past.back().map(HistoryEntry::label)
    }

    /// Label of the entry `redo` would re-apply.
    pub fn redo_label(&self) -> Option<&str> {
        self.future.last().map(HistoryEntry::label)
    }

    /// Number of entries on the undo stack.
    pub fn past_len(&self) -> usize {
        self.past.len()
    }

    /// Number of entries on the redo stack.
    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    /// Drop both stacks. An open batch is left alone.
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementPatch};
    use kurbo::Point;

    struct Fixture {
        store: ElementStore,
        selection: SelectionManager,
        history: HistoryEngine,
    }

    impl Fixture {
        fn new(limit: usize) -> Self {
            Self {
                store: ElementStore::new(),
                selection: SelectionManager::new(),
                history: HistoryEngine::new(limit),
            }
        }

        fn add(&mut self, id: &str) {
            let change = self
                .store
                .upsert(Element::rectangle(0.0, 0.0, 10.0, 10.0).with_id(id))
                .unwrap();
            self.history.record_change(change);
        }

        fn begin(&mut self, label: &str) {
            self.history.begin_batch(label, &self.selection);
        }

        fn end(&mut self, committed: bool) -> BatchOutcome {
            self.history
                .end_batch(committed, &mut self.store, &self.selection)
        }

        fn undo(&mut self) -> bool {
            self.history.undo(&mut self.store, &mut self.selection)
        }

        fn redo(&mut self) -> bool {
            self.history.redo(&mut self.store, &mut self.selection)
        }

        fn ids(&self) -> Vec<&str> {
            self.store.order().iter().map(|id| id.as_str()).collect()
        }
    }

    #[test]
    fn test_batch_commits_single_entry() {
        let mut fx = Fixture::new(10);
        fx.begin("add two");
        fx.add("a");
        fx.add("b");
        assert_eq!(fx.history.state(), HistoryState::Batching { depth: 1 });
        assert_eq!(fx.end(true), BatchOutcome::Committed);
        assert_eq!(fx.history.past_len(), 1);
        assert_eq!(fx.history.undo_label(), Some("add two"));

        assert!(fx.undo());
        assert!(fx.store.is_empty());
        assert!(fx.redo());
        assert_eq!(fx.ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_nested_batches_are_transparent() {
        let mut fx = Fixture::new(10);
        fx.begin("outer");
        fx.add("a");
        fx.begin("inner");
        fx.add("b");
        assert_eq!(fx.history.depth(), 2);
        assert_eq!(fx.end(true), BatchOutcome::Nested);
        assert_eq!(fx.history.past_len(), 0);
        assert_eq!(fx.end(true), BatchOutcome::Committed);
        assert_eq!(fx.history.past_len(), 1);
        assert_eq!(fx.history.undo_label(), Some("outer"));
    }

    #[test]
    fn test_inner_rollback_keeps_outer_changes() {
        let mut fx = Fixture::new(10);
        fx.begin("outer");
        fx.add("a");
        fx.begin("inner");
        fx.add("b");
        assert!(matches!(fx.end(false), BatchOutcome::RolledBack { .. }));
        assert_eq!(fx.ids(), vec!["a"]);
        assert_eq!(fx.end(true), BatchOutcome::Committed);
        assert!(fx.undo());
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_outer_rollback_records_nothing() {
        let mut fx = Fixture::new(10);
        fx.begin("doomed");
        fx.add("a");
        assert!(matches!(fx.end(false), BatchOutcome::RolledBack { .. }));
        assert!(fx.store.is_empty());
        assert!(!fx.history.can_undo());
        assert_eq!(fx.history.state(), HistoryState::Idle);
    }

    #[test]
    fn test_rollback_returns_level_selection() {
        let mut fx = Fixture::new(10);
        fx.add("a");
        fx.selection.set_selection([ElementId::from("a")]);
        fx.begin("outer");
        fx.selection.clear_selection();
        fx.begin("inner");
        fx.add("b");
        fx.selection.set_selection([ElementId::from("b")]);
        match fx.end(false) {
            BatchOutcome::RolledBack { reverted, selection } => {
                assert_eq!(reverted, vec![ElementId::from("b")]);
                assert!(selection.is_empty());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        match fx.end(false) {
            BatchOutcome::RolledBack { selection, .. } => {
                assert_eq!(selection, vec![ElementId::from("a")]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(fx.ids(), vec!["a"]);
    }

    #[test]
    fn test_empty_batch_records_nothing() {
        let mut fx = Fixture::new(10);
        fx.begin("nothing");
        assert_eq!(fx.end(true), BatchOutcome::Empty);
        assert!(!fx.history.can_undo());
    }

    #[test]
    fn test_end_without_begin() {
        let mut fx = Fixture::new(10);
        assert_eq!(fx.end(true), BatchOutcome::NotOpen);
    }

    #[test]
    fn test_new_entry_discards_redo_branch() {
        let mut fx = Fixture::new(10);
        fx.begin("a");
        fx.add("a");
        fx.end(true);
        assert!(fx.undo());
        assert!(fx.history.can_redo());
        fx.begin("b");
        fx.add("b");
        fx.end(true);
        assert!(!fx.history.can_redo());
        assert!(!fx.redo());
        assert_eq!(fx.ids(), vec!["b"]);
    }

    #[test]
    fn test_empty_stacks_are_noops() {
        let mut fx = Fixture::new(10);
        assert!(!fx.undo());
        assert!(!fx.redo());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut fx = Fixture::new(3);
        for id in ["a", "b", "c", "d", "e"] {
            fx.begin(id);
            fx.add(id);
            fx.end(true);
        }
        assert_eq!(fx.history.past_len(), 3);
        while fx.undo() {}
        assert_eq!(fx.ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_changes_outside_batch_are_ignored() {
        let mut fx = Fixture::new(10);
        fx.add("a");
        assert!(!fx.history.can_undo());
    }

    #[test]
    fn test_undo_restores_selection() {
        let mut fx = Fixture::new(10);
        fx.add("a");
        fx.selection.set_selection([ElementId::from("a")]);
        fx.begin("move");
        let change = fx
            .store
            .update(&"a".into(), &ElementPatch::new().position(Point::new(5.0, 5.0)))
            .unwrap()
            .unwrap();
        fx.history.record_change(change);
        fx.selection.clear_selection();
        fx.end(true);

        assert!(fx.undo());
        assert_eq!(fx.selection.ids(), vec![ElementId::from("a")]);
        assert!(fx.redo());
        assert!(fx.selection.is_empty());
    }

    #[test]
    fn test_undo_refused_inside_batch() {
        let mut fx = Fixture::new(10);
        fx.begin("a");
        fx.add("a");
        fx.end(true);
        fx.begin("b");
        assert!(!fx.undo());
        fx.end(true);
        assert!(fx.undo());
    }

    #[test]
    fn test_record_pushes_prebuilt_entry() {
        let mut fx = Fixture::new(10);
        let change = fx
            .store
            .upsert(Element::rectangle(0.0, 0.0, 1.0, 1.0).with_id("x"))
            .unwrap();
        fx.history.record("external", vec![change], Vec::new(), Vec::new());
        assert_eq!(fx.history.undo_label(), Some("external"));
        assert!(fx.undo());
        assert!(fx.store.is_empty());
        assert_eq!(fx.history.redo_label(), Some("external"));
    }
}
