/*
 * Painting Tasks
 *
 * One task per (method, input-coloring, output-coloring) key. A task owns
 * its latest result plus the dependency/dependant wiring of the
 * interprocedural fixpoint. The atomic queued flag implements the
 * NEW → QUEUED → RUNNING → IDLE cycle: the IDLE↔QUEUED loop is the fixpoint.
 *
 * Locking: all mutable state sits behind one parking_lot mutex per task.
 * Callers never hold two task locks at once — dependency rewiring computes
 * the diff under the task's own lock, then touches the other tasks outside.
 */

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::features::colored::domain::{ColorKind, ColoredObject};
use crate::shared::models::MethodRef;

/// Session-unique task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

/// Canonical, hashable rendering of a boundary coloring: per position, the
/// observed classes and their color kinds. Traces and confidence are
/// deliberately not part of task identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ColoringSummary(Vec<Option<BTreeMap<String, ColorKind>>>);

impl ColoringSummary {
    pub fn of(colors: &[Option<ColoredObject>]) -> Self {
        Self(
            colors
                .iter()
                .map(|entry| entry.as_ref().map(ColoredObject::kind_summary))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Identity of one unit of interprocedural work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub method: MethodRef,
    pub ins: ColoringSummary,
    pub outs: ColoringSummary,
}

/// Result of one task execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    /// Final parameter colorings, receiver-inclusive
    pub ins: Vec<Option<ColoredObject>>,
    /// Final result colorings (empty for void)
    pub outs: Vec<Option<ColoredObject>>,
    /// Heap version this result was computed against
    pub heap_version: u64,
}

impl TaskResult {
    pub fn has_any_color(&self) -> bool {
        self.ins
            .iter()
            .chain(self.outs.iter())
            .any(Option::is_some)
    }
}

#[derive(Default)]
struct TaskState {
    result: Option<TaskResult>,
    dependencies: FxHashMap<TaskId, Arc<PaintingTask>>,
    dependants: FxHashMap<TaskId, Arc<PaintingTask>>,
    executions: u32,
}

/// One unit of interprocedural painting work. Created on first demand,
/// updated on each execution, never destroyed within a session.
pub struct PaintingTask {
    pub id: TaskId,
    pub key: TaskKey,
    /// Seed colorings applied before the brushes run (entry pre-coloring;
    /// empty for discovered callees)
    pub seed_ins: Vec<Option<ColoredObject>>,
    pub seed_outs: Vec<Option<ColoredObject>>,
    queued: AtomicBool,
    running: AtomicBool,
    state: Mutex<TaskState>,
}

impl PaintingTask {
    pub fn new(
        id: TaskId,
        key: TaskKey,
        seed_ins: Vec<Option<ColoredObject>>,
        seed_outs: Vec<Option<ColoredObject>>,
    ) -> Self {
        Self {
            id,
            key,
            seed_ins,
            seed_outs,
            queued: AtomicBool::new(false),
            running: AtomicBool::new(false),
            state: Mutex::new(TaskState::default()),
        }
    }

    pub fn method(&self) -> &MethodRef {
        &self.key.method
    }

    /// Snapshot of the latest result.
    pub fn result(&self) -> Option<TaskResult> {
        self.state.lock().result.clone()
    }

    pub fn store_result(&self, result: TaskResult) {
        self.state.lock().result = Some(result);
    }

    /// Count this execution; returns the new total.
    pub fn bump_executions(&self) -> u32 {
        let mut state = self.state.lock();
        state.executions += 1;
        state.executions
    }

    /// Swap the dependency set, returning (newly added, no longer needed)
    /// so the caller can rewire dependant links without holding this lock.
    pub fn replace_dependencies(
        &self,
        new: FxHashMap<TaskId, Arc<PaintingTask>>,
    ) -> (Vec<Arc<PaintingTask>>, Vec<Arc<PaintingTask>>) {
        let mut state = self.state.lock();
        let added = new
            .iter()
            .filter(|(id, _)| !state.dependencies.contains_key(id))
            .map(|(_, task)| task.clone())
            .collect();
        let removed = state
            .dependencies
            .iter()
            .filter(|(id, _)| !new.contains_key(id))
            .map(|(_, task)| task.clone())
            .collect();
        state.dependencies = new;
        (added, removed)
    }

    pub fn add_dependant(&self, task: &Arc<PaintingTask>) {
        self.state.lock().dependants.insert(task.id, task.clone());
    }

    pub fn remove_dependant(&self, id: TaskId) {
        self.state.lock().dependants.remove(&id);
    }

    pub fn dependants(&self) -> Vec<Arc<PaintingTask>> {
        self.state.lock().dependants.values().cloned().collect()
    }

    /// Atomically claim queue membership; false if already queued.
    pub fn try_mark_queued(&self) -> bool {
        self.queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    /// Mark this task as executing; false if another worker already runs it.
    pub fn try_mark_running(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_running(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::colored::domain::{PaintedColor, TraceItem};

    fn task(id: u32) -> Arc<PaintingTask> {
        Arc::new(PaintingTask::new(
            TaskId(id),
            TaskKey {
                method: MethodRef::new("demo.Simple", "f", "()V"),
                ins: ColoringSummary::empty(),
                outs: ColoringSummary::empty(),
            },
            Vec::new(),
            Vec::new(),
        ))
    }

    #[test]
    fn test_summary_ignores_traces() {
        let a = vec![Some(ColoredObject::for_root(
            "java.lang.String",
            PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("one")),
        ))];
        let b = vec![Some(ColoredObject::for_root(
            "java.lang.String",
            PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("two")),
        ))];
        assert_eq!(ColoringSummary::of(&a), ColoringSummary::of(&b));
        assert_ne!(ColoringSummary::of(&a), ColoringSummary::empty());
    }

    #[test]
    fn test_queue_flag_is_claim_once() {
        let t = task(1);
        assert!(t.try_mark_queued());
        assert!(!t.try_mark_queued());
        t.clear_queued();
        assert!(t.try_mark_queued());
    }

    #[test]
    fn test_dependency_diff() {
        let t = task(1);
        let a = task(2);
        let b = task(3);
        let mut first = FxHashMap::default();
        first.insert(a.id, a.clone());
        let (added, removed) = t.replace_dependencies(first);
        assert_eq!(added.len(), 1);
        assert!(removed.is_empty());

        let mut second = FxHashMap::default();
        second.insert(b.id, b.clone());
        let (added, removed) = t.replace_dependencies(second);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, b.id);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, a.id);
    }

    #[test]
    fn test_result_change_detection_ignores_heap_only_when_equal() {
        let t = task(1);
        assert!(t.result().is_none());
        t.store_result(TaskResult {
            ins: vec![None],
            outs: vec![],
            heap_version: 0,
        });
        let r = t.result().unwrap();
        assert!(!r.has_any_color());
    }
}
