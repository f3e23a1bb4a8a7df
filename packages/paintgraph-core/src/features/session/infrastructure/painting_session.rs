/*
 * Painting Session
 *
 * The interprocedural fixpoint: one painting task per (method, ins, outs)
 * key, executed by the worker pool. Coloring a method discovers its call
 * sites; each resolvable callee becomes a dependency task whose cached
 * result feeds back into the caller. When a task's result changes, its
 * dependants requeue. The run terminates when the worklist drains, which
 * monotone merges over a finite color lattice guarantee.
 */

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::errors::Result;
use crate::features::colored::domain::{ColorKind, ColoredObject, TraceItem};
use crate::features::colored::infrastructure::{BoundaryColors, GraphColorer};
use crate::features::colored::ports::RuleProvider;
use crate::features::colorless::domain::{Invocation, NodeId};
use crate::features::session::domain::{
    ColoringSummary, PaintingTask, TaskId, TaskKey, TaskResult,
};
use crate::features::session::infrastructure::executor::PaintingExecutor;
use crate::shared::models::MethodRef;
use crate::shared::ports::ClassResolver;

/// Per-task execution cap; a safety valve over the monotonicity argument.
pub const MAX_TASK_EXECUTIONS: u32 = 256;

/// Why a task is being queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueReason {
    /// Entry point of an analysis
    Entry,
    /// Discovered as a new dependency of the task just executed
    NewDependency,
    /// A dependency's result changed; freshness does not excuse this one
    DependencyUpdate,
}

/// Interprocedural painting session over one class universe.
pub struct PaintingSession<'a> {
    resolver: &'a dyn ClassResolver,
    colorer: GraphColorer<'a>,
    tasks: DashMap<TaskKey, Arc<PaintingTask>>,
    next_task_id: AtomicU32,
    heap_version: AtomicU64,
    executor: PaintingExecutor,
    on_intersection: Box<dyn Fn(&TraceItem, &TraceItem) + Send + Sync + 'a>,
}

impl<'a> PaintingSession<'a> {
    pub fn new(
        resolver: &'a dyn ClassResolver,
        rules: &'a dyn RuleProvider,
        on_intersection: impl Fn(&TraceItem, &TraceItem) + Send + Sync + 'a,
    ) -> Self {
        Self::with_workers(resolver, rules, on_intersection, 0)
    }

    /// `workers == 0` sizes the pool to the available parallelism.
    pub fn with_workers(
        resolver: &'a dyn ClassResolver,
        rules: &'a dyn RuleProvider,
        on_intersection: impl Fn(&TraceItem, &TraceItem) + Send + Sync + 'a,
        workers: usize,
    ) -> Self {
        Self {
            resolver,
            colorer: GraphColorer::new(resolver, rules),
            tasks: DashMap::new(),
            next_task_id: AtomicU32::new(0),
            heap_version: AtomicU64::new(0),
            executor: PaintingExecutor::new(workers),
            on_intersection: Box::new(on_intersection),
        }
    }

    /// Analyze an entry method with no pre-coloring.
    pub fn analyze_entry(&self, method: &MethodRef) -> Result<Option<BoundaryColors>> {
        self.analyze(method, None, None)
    }

    /// Analyze an entry method, optionally pre-coloring its parameters and
    /// results. Returns the final boundary colorings with the receiver entry
    /// stripped for instance methods, or `None` for a bodyless method.
    pub fn analyze(
        &self,
        method: &MethodRef,
        ins: Option<Vec<Option<ColoredObject>>>,
        outs: Option<Vec<Option<ColoredObject>>>,
    ) -> Result<Option<BoundaryColors>> {
        let Some(body) = self.resolver.method_body(method)? else {
            return Ok(None);
        };

        let seed_ins = ins.unwrap_or_default();
        let seed_outs = outs.unwrap_or_default();
        let key = TaskKey {
            method: method.clone(),
            ins: ColoringSummary::of(&seed_ins),
            outs: ColoringSummary::of(&seed_outs),
        };
        let task = self.intern_task(key, seed_ins, seed_outs);
        self.queue_task(&task, QueueReason::Entry);

        self.executor.run(&|task| self.execute_task(task));
        debug!("all painting tasks completed");

        match task.result() {
            None => Ok(None),
            Some(result) => {
                let ins = if body.is_static || result.ins.is_empty() {
                    result.ins
                } else {
                    result.ins[1..].to_vec()
                };
                Ok(Some((ins, result.outs)))
            }
        }
    }

    /// Cooperatively cancel the session; tasks in progress finish.
    pub fn cancel(&self) {
        self.executor.cancel();
    }

    pub fn heap_version(&self) -> u64 {
        self.heap_version.load(Ordering::SeqCst)
    }

    /// Invalidate every cached result's freshness. Reserved for a future
    /// heap model; results computed against an older version re-run when
    /// next queued.
    pub fn bump_heap_version(&self) -> u64 {
        self.heap_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn intern_task(
        &self,
        key: TaskKey,
        seed_ins: Vec<Option<ColoredObject>>,
        seed_outs: Vec<Option<ColoredObject>>,
    ) -> Arc<PaintingTask> {
        self.tasks
            .entry(key.clone())
            .or_insert_with(|| {
                let id = TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst));
                Arc::new(PaintingTask::new(id, key, seed_ins, seed_outs))
            })
            .clone()
    }

    fn queue_task(&self, task: &Arc<PaintingTask>, reason: QueueReason) {
        if reason != QueueReason::DependencyUpdate {
            if let Some(result) = task.result() {
                if result.heap_version == self.heap_version() {
                    debug!(method = %task.method(), "cached result is fresh enough");
                    return;
                }
            }
        }
        self.executor.queue_task(task.clone());
    }

    fn execute_task(&self, task: &Arc<PaintingTask>) {
        if !task.try_mark_running() {
            // a duplicate pop raced with the running worker; try again later
            self.executor.queue_task(task.clone());
            return;
        }
        self.execute_task_inner(task);
        task.clear_running();
    }

    fn execute_task_inner(&self, task: &Arc<PaintingTask>) {
        let executions = task.bump_executions();
        if executions > MAX_TASK_EXECUTIONS {
            warn!(
                method = %task.method().long_name(),
                executions,
                "task exceeded its execution cap; keeping its last result"
            );
            return;
        }

        debug!(method = %task.method().long_name(), "(re)coloring");
        let used_heap_version = self.heap_version();
        let mut new_dependencies: FxHashMap<TaskId, Arc<PaintingTask>> = FxHashMap::default();

        let outcome = {
            let mut resolve = |invocation: &Invocation,
                               ins: &[Option<ColoredObject>],
                               outs: &[Option<ColoredObject>]|
             -> FxHashMap<NodeId, ColoredObject> {
                self.resolve_callee(invocation, ins, outs, task, &mut new_dependencies)
            };
            let mut on_intersection =
                |source: &TraceItem, sink: &TraceItem| (self.on_intersection)(source, sink);
            self.colorer.color(
                task.method(),
                &task.seed_ins,
                &task.seed_outs,
                &mut resolve,
                &mut on_intersection,
            )
        };

        let updated = match outcome {
            Err(err) => {
                error!(
                    method = %task.method().long_name(),
                    %err,
                    "unable to execute painting task; abandoning it"
                );
                // no, we don't requeue after an error
                return;
            }
            Ok(updated) => updated,
        };

        // rewire dependency links before looking at the result so stale
        // dependencies stop waking this task up
        let (added, removed) = task.replace_dependencies(new_dependencies);
        for dependency in &added {
            dependency.add_dependant(task);
        }
        for dependency in &removed {
            dependency.remove_dependant(task.id);
        }
        for dependency in added {
            self.queue_task(&dependency, QueueReason::NewDependency);
        }

        let Some((ins, outs)) = updated else {
            warn!(method = %task.method().long_name(), "no graph to travel deeper into");
            return;
        };

        let previous = task.result();
        let changed = match &previous {
            None => true,
            Some(prev) => {
                prev.ins != ins || prev.outs != outs || prev.heap_version < used_heap_version
            }
        };
        if changed {
            let result = TaskResult {
                ins,
                outs,
                heap_version: used_heap_version,
            };
            let worth_waking = result.has_any_color();
            task.store_result(result);
            if worth_waking {
                debug!(method = %task.method().long_name(), "colors changed; waking dependants");
                for dependant in task.dependants() {
                    self.queue_task(&dependant, QueueReason::DependencyUpdate);
                }
            } else {
                debug!(
                    method = %task.method().long_name(),
                    "colors changed but the result is colorless; dependants stay asleep"
                );
            }
        } else {
            debug!(method = %task.method().long_name(), "colors unchanged after rechecking");
        }
    }

    /// Resolve one call site: record the callee task as a dependency and
    /// hand back whatever its cached result contributes, keyed by the call
    /// site's own data nodes.
    fn resolve_callee(
        &self,
        invocation: &Invocation,
        ins: &[Option<ColoredObject>],
        outs: &[Option<ColoredObject>],
        caller: &Arc<PaintingTask>,
        new_dependencies: &mut FxHashMap<TaskId, Arc<PaintingTask>>,
    ) -> FxHashMap<NodeId, ColoredObject> {
        debug_assert_eq!(ins.len(), invocation.parameters.len());
        debug_assert_eq!(outs.len(), usize::from(invocation.result.is_some()));

        debug!(
            caller = %caller.method(),
            callee_class = %invocation.class_name,
            callee = %invocation.method_name,
            "going deeper"
        );

        // virtual-dispatch refinement: a single observed receiver class that
        // properly subtypes the declared one wins the resolution
        let mut target_class = invocation.class_name.clone();
        if !invocation.static_call && invocation.method_name != "<init>" {
            if let Some(Some(receiver)) = ins.first() {
                if receiver.class_count() == 1 {
                    let observed = receiver.classes().next().expect("one observed class");
                    if observed != target_class
                        && self.resolver.is_subtype(observed, &target_class)
                    {
                        target_class = observed.to_string();
                    }
                }
            }
        }

        let resolved = if invocation.method_name == "<init>" {
            self.resolver
                .get_constructor(&target_class, &invocation.descriptor)
        } else {
            self.resolver
                .get_method(&target_class, &invocation.method_name, &invocation.descriptor)
        };
        let method = match resolved {
            Ok(method) => method,
            Err(err) => {
                warn!(%err, "unable to go deeper; eliding the call");
                return FxHashMap::default();
            }
        };

        match self.colorer.graph_of(&method) {
            Ok(Some(_)) => {}
            // bodyless target: nothing to color, nothing to depend on
            Ok(None) => return FxHashMap::default(),
            Err(err) => {
                warn!(%err, "unable to go deeper; eliding the call");
                return FxHashMap::default();
            }
        }

        let mut updated_ins: Vec<Option<ColoredObject>> = vec![None; ins.len()];
        let mut updated_outs: Vec<Option<ColoredObject>> = vec![None; outs.len()];

        ColoredObject::demultiplex(ins, &mut |_single_class_ins| {
            let key = TaskKey {
                method: method.clone(),
                ins: ColoringSummary::empty(),
                outs: ColoringSummary::empty(),
            };
            let callee = self.intern_task(key, Vec::new(), Vec::new());
            new_dependencies.insert(callee.id, callee.clone());

            if let Some(cached) = callee.result() {
                let mut on_intersection =
                    |source: &TraceItem, sink: &TraceItem| (self.on_intersection)(source, sink);
                for (slot, updated) in updated_ins.iter_mut().enumerate() {
                    *updated = ColoredObject::merge_most_dangerous(
                        updated.as_ref(),
                        cached.ins.get(slot).and_then(Option::as_ref),
                        &mut on_intersection,
                    );
                }
                for (slot, updated) in updated_outs.iter_mut().enumerate() {
                    *updated = ColoredObject::merge_most_dangerous(
                        updated.as_ref(),
                        cached.outs.get(slot).and_then(Option::as_ref),
                        &mut on_intersection,
                    );
                }
            }
        });

        let mut result = FxHashMap::default();
        for (node, updated) in invocation.parameters.iter().zip(updated_ins) {
            if let Some(coloring) = updated {
                result.insert(*node, coloring);
            }
        }
        if let (Some(node), Some(Some(coloring))) =
            (invocation.result, updated_outs.into_iter().next())
        {
            result.insert(node, coloring);
        }
        result
    }
}

/// Extract the dominant color kind per boundary position; what test
/// harnesses and reports usually want.
pub fn color_kinds(colors: &[Option<ColoredObject>]) -> Vec<Option<ColorKind>> {
    colors
        .iter()
        .map(|entry| {
            entry
                .as_ref()
                .and_then(|co| co.dominant_color())
                .map(|color| color.kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{kinds, ClassBuilder, FixtureResolver, MethodAsm, RuleSet};

    fn recursive_universe() -> FixtureResolver {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(
                ClassBuilder::new("demo.Rec")
                    .method(
                        MethodAsm::new_static("f", "(Ljava/lang/String;)Ljava/lang/String;")
                            .aload(0)
                            .invokestatic("demo.Rec", "g", "(Ljava/lang/String;)Ljava/lang/String;")
                            .areturn(),
                    )
                    .method(
                        MethodAsm::new_static("g", "(Ljava/lang/String;)Ljava/lang/String;")
                            .aload(0)
                            .invokestatic("demo.Rec", "f", "(Ljava/lang/String;)Ljava/lang/String;")
                            .areturn(),
                    ),
            )
            .unwrap();
        resolver
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let resolver = recursive_universe();
        let rules = RuleSet::new();
        let session = PaintingSession::with_workers(
            &resolver,
            &rules,
            |_: &TraceItem, _: &TraceItem| panic!("no intersection expected"),
            2,
        );
        let method = resolver.method_ref("demo.Rec", "f").unwrap();
        let (ins, outs) = session.analyze_entry(&method).unwrap().unwrap();
        assert_eq!(kinds(&ins), vec![None]);
        assert_eq!(kinds(&outs), vec![None]);
        // entry task plus the two discovered callees
        assert!(session.task_count() >= 2);
    }

    #[test]
    fn test_repeated_analysis_is_idempotent() {
        let resolver = recursive_universe();
        let rules = RuleSet::new();
        let session = PaintingSession::with_workers(
            &resolver,
            &rules,
            |_: &TraceItem, _: &TraceItem| {},
            2,
        );
        let method = resolver.method_ref("demo.Rec", "f").unwrap();
        let first = session.analyze_entry(&method).unwrap().unwrap();
        let second = session.analyze_entry(&method).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_heap_version_bump_invalidates_freshness() {
        let resolver = recursive_universe();
        let rules = RuleSet::new();
        let session =
            PaintingSession::with_workers(&resolver, &rules, |_: &TraceItem, _: &TraceItem| {}, 2);
        let method = resolver.method_ref("demo.Rec", "f").unwrap();
        session.analyze_entry(&method).unwrap().unwrap();
        assert_eq!(session.heap_version(), 0);
        assert_eq!(session.bump_heap_version(), 1);
        // stale results recolor rather than being served from cache
        let after = session.analyze_entry(&method).unwrap().unwrap();
        assert_eq!(kinds(&after.0), vec![None]);
    }

    #[test]
    fn test_unknown_entry_method_errors() {
        let resolver = recursive_universe();
        let rules = RuleSet::new();
        let session =
            PaintingSession::with_workers(&resolver, &rules, |_: &TraceItem, _: &TraceItem| {}, 1);
        let missing = MethodRef::new("demo.Missing", "f", "()V");
        assert!(session.analyze_entry(&missing).is_err());
    }

    #[test]
    fn test_bodyless_entry_method_analyzes_to_none() {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(ClassBuilder::new("demo.Db").abstract_method(
                "execute",
                "(Ljava/lang/String;)V",
                false,
            ))
            .unwrap();
        let rules = RuleSet::new();
        let session =
            PaintingSession::with_workers(&resolver, &rules, |_: &TraceItem, _: &TraceItem| {}, 1);
        let method = resolver.method_ref("demo.Db", "execute").unwrap();
        assert!(session.analyze_entry(&method).unwrap().is_none());
    }
}
