//! Fixpoint scheduler for expansion threads.
//!
//! Threads are driven in passes until a full pass makes no progress. Pure
//! threads settle first; whatever is still blocked at that point can never be
//! unblocked and is reported as stalled. Threads allowed to perform observable
//! effects only run once the pure threads have settled with no stalls.

use std::cmp::Reverse;

use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::effect::{Effect, EffectHost, Mode, Step, ThreadCx, Writes};
use crate::namespace::NamespacePath;
use crate::store::DefinitionStore;
use crate::value::Value;
use crate::{Error, Result};

pub type ThreadId = u64;

#[derive(Debug)]
struct Thread {
    id: ThreadId,
    effect: Option<Effect>,
    observable: bool,
    /// Consecutive attempts that ended blocked.
    failures: u32,
    writes: Writes,
}

/// Summary of a [`Scheduler::run`].
#[derive(Debug, Default)]
pub struct RunReport {
    /// Full and probing passes performed.
    pub passes: usize,
    pub finished: usize,
    /// Entries written to the definition store.
    pub committed: usize,
    /// One stall error per abandoned thread.
    pub stalls: Vec<Error>,
    /// Observable threads left unrun because the run was pure or stalled.
    pub skipped_observable: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.stalls.is_empty()
    }

    pub fn into_result(self) -> Result<RunReport> {
        if self.stalls.is_empty() {
            Ok(self)
        } else {
            Err(Error::Stalled {
                stalls: self.stalls,
            })
        }
    }
}

/// Result of driving one thread as far as it will go.
enum Drive {
    Finished(Value),
    Blocked { effect: Effect, progressed: bool },
}

fn drive(mut effect: Effect, store: &DefinitionStore, cx: &mut ThreadCx<'_>) -> Result<Drive> {
    let mut progressed = false;
    loop {
        effect = match effect.step(store, cx)? {
            Step::Done(value) => return Ok(Drive::Finished(value)),
            Step::Progressed(next) => {
                progressed = true;
                next
            }
            Step::Blocked(effect) => return Ok(Drive::Blocked { effect, progressed }),
        };
    }
}

#[derive(Debug)]
pub struct Scheduler {
    store: DefinitionStore,
    threads: Vec<Thread>,
    /// Threads spawned during the current pass, admitted after it.
    incoming: Vec<Thread>,
    next_thread: ThreadId,
    next_mode: u64,
    probe_passes: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            store: DefinitionStore::new(),
            threads: Vec::new(),
            incoming: Vec::new(),
            next_thread: 0,
            next_mode: 0,
            probe_passes: true,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        let mut scheduler = Self::new();
        scheduler.probe_passes = config.scheduler.probe_passes;
        scheduler
    }

    pub fn set_probe_passes(&mut self, enabled: bool) {
        self.probe_passes = enabled;
    }

    pub fn store(&self) -> &DefinitionStore {
        &self.store
    }

    pub fn into_store(self) -> DefinitionStore {
        self.store
    }

    /// Threads not yet finished or abandoned.
    pub fn pending_threads(&self) -> usize {
        self.threads.len() + self.incoming.len()
    }

    /// Commit a batch directly, outside any thread.
    pub fn commit<I>(&mut self, batch: I) -> Result<usize>
    where
        I: IntoIterator<Item = (NamespacePath, Value)>,
    {
        self.store.commit(batch)
    }

    pub fn spawn(&mut self, effect: Effect) -> ThreadId {
        self.enqueue(effect, false)
    }

    pub fn spawn_observable(&mut self, effect: Effect) -> ThreadId {
        self.enqueue(effect, true)
    }

    fn enqueue(&mut self, effect: Effect, observable: bool) -> ThreadId {
        let thread = self.new_thread(effect, observable);
        let id = thread.id;
        self.threads.push(thread);
        id
    }

    fn new_thread(&mut self, effect: Effect, observable: bool) -> Thread {
        let id = self.next_thread;
        self.next_thread += 1;
        Thread {
            id,
            effect: Some(effect),
            observable,
            failures: 0,
            writes: Writes::default(),
        }
    }

    /// Fresh handle for one observable step.
    pub fn new_mode(&mut self) -> Mode {
        self.next_mode += 1;
        Mode::new(self.next_mode)
    }

    /// Settle pure threads, then run observable threads if nothing stalled.
    pub fn run(&mut self, host: &mut dyn EffectHost) -> Result<RunReport> {
        let mut report = RunReport::default();
        self.settle(&mut report, None)?;
        self.abandon_stalled(&mut report, |thread| !thread.observable);
        if !report.stalls.is_empty() {
            report.skipped_observable = self.pending_threads();
            return Ok(report);
        }
        self.settle(&mut report, Some(host))?;
        self.abandon_stalled(&mut report, |_| true);
        Ok(report)
    }

    /// Settle pure threads only; observable threads stay queued.
    pub fn run_pure(&mut self) -> Result<RunReport> {
        let mut report = RunReport::default();
        self.settle(&mut report, None)?;
        self.abandon_stalled(&mut report, |thread| !thread.observable);
        report.skipped_observable = self.pending_threads();
        Ok(report)
    }

    /// Run one effect to completion under `mode`.
    ///
    /// While the effect is blocked the pure pool is settled; if that does not
    /// unblock it, the effect's stall error is returned. Writes and spawned
    /// threads of the effect join the pool. The report covers the pool work
    /// done while waiting plus the effect's own writes.
    pub fn run_effect(
        &mut self,
        effect: Effect,
        mode: Mode,
        host: &mut dyn EffectHost,
    ) -> Result<(Value, RunReport)> {
        let mut report = RunReport::default();
        let mut writes = Writes::default();
        let mut effect = effect;
        loop {
            let mut cx = ThreadCx::observable(&mut writes, mode, &mut *host);
            match drive(effect, &self.store, &mut cx)? {
                Drive::Finished(value) => {
                    report.committed += self.store.commit(writes.puts)?;
                    for spawn in writes.spawns {
                        let thread = self.new_thread(spawn.effect, spawn.observable);
                        self.threads.push(thread);
                    }
                    debug!(
                        mode = mode.id(),
                        passes = report.passes,
                        committed = report.committed,
                        "effect finished"
                    );
                    return Ok((value, report));
                }
                Drive::Blocked {
                    effect: blocked,
                    progressed,
                } => {
                    self.settle(&mut report, None)?;
                    let unblocked = blocked
                        .awaiting()
                        .is_some_and(|path| self.store.contains(path));
                    if !unblocked && !progressed {
                        return Err(blocked.into_stall().unwrap_or_else(|| {
                            Error::Effect("effect blocked without a pending lookup".into())
                        }));
                    }
                    effect = blocked;
                }
            }
        }
    }

    /// Pass over the pool until nothing moves.
    fn settle<'h>(
        &mut self,
        report: &mut RunReport,
        mut host: Option<&mut (dyn EffectHost + 'h)>,
    ) -> Result<()> {
        let allow_observable = host.is_some();
        loop {
            let all: Vec<usize> = (0..self.threads.len()).collect();
            let progressed = self.pass(&all, report, host.as_deref_mut())?;
            report.passes += 1;
            let admitted = self.admit();
            debug!(
                pass = report.passes,
                threads = self.threads.len(),
                admitted,
                progressed,
                "scheduler pass"
            );
            if !progressed && admitted == 0 {
                return Ok(());
            }
            if self.probe_passes {
                self.probe(report, allow_observable, host.as_deref_mut())?;
            }
        }
    }

    /// Reorder by likely readiness and retry a square-root-sized tail.
    ///
    /// Purely a heuristic: every eligible thread is retried by the next full pass.
    fn probe<'h>(
        &mut self,
        report: &mut RunReport,
        allow_observable: bool,
        host: Option<&mut (dyn EffectHost + 'h)>,
    ) -> Result<()> {
        self.threads
            .sort_by_key(|thread| (thread.observable, Reverse(thread.failures)));
        let eligible = self
            .threads
            .iter()
            .filter(|thread| allow_observable || !thread.observable)
            .count();
        let width = eligible.isqrt();
        if width == 0 || width == eligible {
            return Ok(());
        }
        let tail: Vec<usize> = (eligible - width..eligible).collect();
        self.pass(&tail, report, host)?;
        report.passes += 1;
        self.admit();
        Ok(())
    }

    /// Drive the threads at `indices`; returns whether any of them moved.
    fn pass<'h>(
        &mut self,
        indices: &[usize],
        report: &mut RunReport,
        mut host: Option<&mut (dyn EffectHost + 'h)>,
    ) -> Result<bool> {
        let mut progressed = false;
        for &index in indices {
            let observable = self.threads[index].observable;
            if observable && host.is_none() {
                continue;
            }
            let Some(effect) = self.threads[index].effect.take() else {
                continue;
            };
            let outcome = match host.as_deref_mut() {
                Some(host) if observable => {
                    let mode = self.new_mode();
                    let thread = &mut self.threads[index];
                    let mut cx = ThreadCx::observable(&mut thread.writes, mode, host);
                    drive(effect, &self.store, &mut cx)?
                }
                _ => {
                    let thread = &mut self.threads[index];
                    let mut cx = ThreadCx::pure(&mut thread.writes);
                    drive(effect, &self.store, &mut cx)?
                }
            };
            match outcome {
                Drive::Finished(_) => {
                    progressed = true;
                    self.finish(index, report)?;
                }
                Drive::Blocked { effect, progressed: moved } => {
                    let thread = &mut self.threads[index];
                    if moved {
                        progressed = true;
                        thread.failures = 0;
                    } else {
                        thread.failures += 1;
                    }
                    thread.effect = Some(effect);
                }
            }
        }
        self.threads.retain(|thread| thread.effect.is_some());
        Ok(progressed)
    }

    /// Commit a finished thread's writes and queue what it spawned.
    fn finish(&mut self, index: usize, report: &mut RunReport) -> Result<()> {
        let writes = std::mem::take(&mut self.threads[index].writes);
        let id = self.threads[index].id;
        let written = self.store.commit(writes.puts)?;
        trace!(thread = id, written, spawned = writes.spawns.len(), "thread finished");
        report.finished += 1;
        report.committed += written;
        for spawn in writes.spawns {
            let thread = self.new_thread(spawn.effect, spawn.observable);
            self.incoming.push(thread);
        }
        Ok(())
    }

    fn admit(&mut self) -> usize {
        let admitted = self.incoming.len();
        self.threads.append(&mut self.incoming);
        admitted
    }

    /// Abandon every remaining thread matching `select`, firing its stall callback.
    fn abandon_stalled<F>(&mut self, report: &mut RunReport, select: F)
    where
        F: Fn(&Thread) -> bool,
    {
        let (stalled, kept): (Vec<Thread>, Vec<Thread>) =
            std::mem::take(&mut self.threads).into_iter().partition(|t| select(t));
        self.threads = kept;
        for thread in stalled {
            let Some(err) = thread.effect.and_then(Effect::into_stall) else {
                continue;
            };
            warn!(thread = thread.id, "{err}");
            report.stalls.push(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::name::Name;
    use crate::namespace::{Namespace, PathKey};

    fn path(name: &str) -> NamespacePath {
        Namespace::root().get(PathKey::Tag("defs")).get(Name::text(name)).path().clone()
    }

    fn define(name: &str, value: Value) -> Effect {
        let target = path(name);
        Effect::done(Value::nil()).then(move |cx, _| {
            cx.put(target, value);
            Ok(Effect::done(Value::nil()))
        })
    }

    /// Reads `from` and defines `to` as `yep(from)`.
    fn derive(from: &str, to: &str) -> Effect {
        let target = path(to);
        Effect::get_or(path(from), format!("reference to `{from}`")).then(move |cx, value| {
            cx.put(target, Value::yep(value));
            Ok(Effect::done(Value::nil()))
        })
    }

    #[derive(Default)]
    struct Recorder {
        requests: Vec<(u64, String)>,
    }

    impl EffectHost for Recorder {
        fn perform(&mut self, mode: &Mode, request: &Value) -> Result<Value> {
            self.requests.push((mode.id(), request.to_string()));
            Ok(Value::nil())
        }
    }

    fn announce(text: &'static str) -> Effect {
        Effect::done(Value::nil()).then(move |cx, _| {
            cx.perform(&Value::string(text))?;
            Ok(Effect::done(Value::nil()))
        })
    }

    fn rendered(store: &DefinitionStore) -> Vec<String> {
        store
            .entries()
            .into_iter()
            .map(|(path, value)| format!("{path}={value}"))
            .collect()
    }

    #[test]
    fn forward_reference_resolves_in_either_order() -> Result<()> {
        let mut results = Vec::new();
        for reader_first in [true, false] {
            let mut scheduler = Scheduler::new();
            if reader_first {
                scheduler.spawn(derive("x", "y"));
                scheduler.spawn(define("x", Value::string("lit")));
            } else {
                scheduler.spawn(define("x", Value::string("lit")));
                scheduler.spawn(derive("x", "y"));
            }
            let report = scheduler.run_pure()?.into_result()?;
            assert_eq!(report.finished, 2);
            assert_eq!(report.committed, 2);
            results.push(rendered(scheduler.store()));
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], ["/defs/x=\"lit\"", "/defs/y=yep(val=\"lit\")"]);
        Ok(())
    }

    #[test]
    fn long_dependency_chains_settle() -> Result<()> {
        for probe in [true, false] {
            let mut scheduler = Scheduler::new();
            scheduler.set_probe_passes(probe);
            for i in (1..50).rev() {
                let (from, to) = (format!("v{}", i - 1), format!("v{i}"));
                scheduler.spawn(derive(&from, &to));
            }
            scheduler.spawn(define("v0", Value::nil()));
            let report = scheduler.run_pure()?.into_result()?;
            assert_eq!(report.committed, 50);
            assert_eq!(scheduler.pending_threads(), 0);
        }
        Ok(())
    }

    #[test]
    fn missing_definition_stalls_only_its_reader() -> Result<()> {
        let mut scheduler = Scheduler::new();
        scheduler.spawn(derive("never", "z"));
        scheduler.spawn(define("a", Value::nil()));
        scheduler.spawn(derive("a", "b"));
        let report = scheduler.run_pure()?;
        assert_eq!(report.stalls.len(), 1);
        assert_eq!(
            report.stalls[0].to_string(),
            "stalled waiting on /defs/never (reference to `never`)"
        );
        assert!(scheduler.store().contains(&path("b")));
        assert!(!scheduler.store().contains(&path("z")));

        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stall);
        Ok(())
    }

    #[test]
    fn duplicate_definitions_abort_the_run() {
        let mut scheduler = Scheduler::new();
        scheduler.spawn(define("x", Value::nil()));
        scheduler.spawn(define("x", Value::nope()));
        let err = scheduler.run_pure().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn spawned_threads_join_the_pool() -> Result<()> {
        let mut scheduler = Scheduler::new();
        scheduler.spawn(Effect::done(Value::nil()).then(|cx, _| {
            cx.defer(derive("base", "derived"));
            cx.defer(define("base", Value::nil()));
            Ok(Effect::done(Value::nil()))
        }));
        let report = scheduler.run_pure()?.into_result()?;
        assert_eq!(report.finished, 3);
        assert!(scheduler.store().contains(&path("derived")));
        Ok(())
    }

    #[test]
    fn observable_threads_wait_for_static_resolution() -> Result<()> {
        let mut scheduler = Scheduler::new();
        scheduler.spawn_observable(announce("hello"));
        scheduler.spawn(derive("x", "y"));
        scheduler.spawn(define("x", Value::nil()));

        let mut host = Recorder::default();
        let report = scheduler.run(&mut host)?.into_result()?;
        assert_eq!(report.finished, 3);
        assert_eq!(host.requests.len(), 1);
        assert_eq!(host.requests[0].1, "\"hello\"");
        Ok(())
    }

    #[test]
    fn stalls_suppress_observable_effects() -> Result<()> {
        let mut scheduler = Scheduler::new();
        scheduler.spawn_observable(announce("too early"));
        scheduler.spawn(derive("never", "y"));

        let mut host = Recorder::default();
        let report = scheduler.run(&mut host)?;
        assert_eq!(report.stalls.len(), 1);
        assert_eq!(report.skipped_observable, 1);
        assert!(host.requests.is_empty());
        Ok(())
    }

    #[test]
    fn pure_runs_skip_observable_threads() -> Result<()> {
        let mut scheduler = Scheduler::new();
        scheduler.spawn_observable(announce("later"));
        let report = scheduler.run_pure()?;
        assert!(report.is_success());
        assert_eq!(report.skipped_observable, 1);

        let mut host = Recorder::default();
        scheduler.run(&mut host)?.into_result()?;
        assert_eq!(host.requests.len(), 1);
        Ok(())
    }

    #[test]
    fn pure_threads_cannot_perform() {
        let mut scheduler = Scheduler::new();
        scheduler.spawn(announce("sneaky"));
        let err = scheduler.run_pure().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Effect);
    }

    #[test]
    fn run_effect_waits_on_the_pool() -> Result<()> {
        let mut scheduler = Scheduler::new();
        scheduler.spawn(define("x", Value::string("ready")));
        let mut host = Recorder::default();
        let effect = Effect::get(path("x")).then(|cx, value| {
            let mode = cx.mode().map(Mode::id);
            cx.perform(&value)?;
            cx.put(path("seen"), Value::nil());
            Ok(Effect::done(Value::string(format!("{mode:?}"))))
        });
        let mode = scheduler.new_mode();
        let (value, report) = scheduler.run_effect(effect, mode, &mut host)?;
        assert_eq!(value.as_string(), Some(format!("{:?}", Some(mode.id())).as_str()));
        assert_eq!(host.requests, [(mode.id(), "\"ready\"".to_string())]);
        assert!(scheduler.store().contains(&path("seen")));
        assert_eq!(report.finished, 1);
        assert_eq!(report.committed, 2);
        assert!(report.passes >= 1);

        let err = scheduler
            .run_effect(Effect::get(path("absent")), mode, &mut host)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stall);
        Ok(())
    }

    #[test]
    fn effects_run_under_the_given_mode() -> Result<()> {
        let mut scheduler = Scheduler::new();
        let mut host = Recorder::default();
        let mode = scheduler.new_mode();
        for text in ["outer", "inner"] {
            let (_, report) = scheduler.run_effect(announce(text), mode, &mut host)?;
            assert_eq!(report.committed, 0);
        }
        let ids: Vec<u64> = host.requests.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, [mode.id(), mode.id()]);
        Ok(())
    }

    #[test]
    fn scheduler_debug_lists_queued_threads() {
        let mut scheduler = Scheduler::new();
        scheduler.spawn(Effect::get(path("later")));
        let rendered = format!("{scheduler:?}");
        assert!(rendered.contains("Pending(/defs/later)"));
    }
}
