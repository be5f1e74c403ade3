//! Suspended computations over the definition store.
//!
//! An [`Effect`] is a small tree: a finished value, a lookup blocked on a
//! namespace path, or a computation followed by a continuation. Threads are
//! advanced one [`Effect::step`] at a time; the only suspension point is a
//! pending lookup whose path has not been committed yet.

use std::fmt;

use smallvec::SmallVec;

use crate::namespace::NamespacePath;
use crate::store::DefinitionStore;
use crate::value::Value;
use crate::{Error, Result};

/// Continuation fed with the value of the computation before it.
pub type Continuation = Box<dyn FnOnce(&mut ThreadCx<'_>, Value) -> Result<Effect>>;

/// Builds the diagnostic for a lookup whose path is never committed.
pub type OnNever = Box<dyn FnOnce(&NamespacePath) -> Error>;

pub struct Pending {
    path: NamespacePath,
    on_never: OnNever,
}

impl Pending {
    pub fn path(&self) -> &NamespacePath {
        &self.path
    }
}

pub enum Effect {
    Done(Value),
    Pending(Pending),
    Then(Box<Effect>, Continuation),
}

/// Outcome of one reduction step.
pub enum Step {
    Done(Value),
    Progressed(Effect),
    Blocked(Effect),
}

impl Effect {
    pub fn done(value: Value) -> Self {
        Effect::Done(value)
    }

    /// Lookup of `path`; a stall reports the bare path.
    pub fn get(path: NamespacePath) -> Self {
        Self::pending(path, |path| Error::Stall {
            path: path.clone(),
            context: None,
        })
    }

    /// Lookup of `path`; a stall reports `context` alongside the path.
    pub fn get_or(path: NamespacePath, context: impl Into<String>) -> Self {
        let context = context.into();
        Self::pending(path, move |path| Error::Stall {
            path: path.clone(),
            context: Some(context),
        })
    }

    pub fn pending<F>(path: NamespacePath, on_never: F) -> Self
    where
        F: FnOnce(&NamespacePath) -> Error + 'static,
    {
        Effect::Pending(Pending {
            path,
            on_never: Box::new(on_never),
        })
    }

    pub fn then<F>(self, continuation: F) -> Self
    where
        F: FnOnce(&mut ThreadCx<'_>, Value) -> Result<Effect> + 'static,
    {
        Effect::Then(Box::new(self), Box::new(continuation))
    }

    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.then(move |_, value| Ok(Effect::Done(f(value)?)))
    }

    /// Reduce by one step.
    ///
    /// Left-nested sequences are reassociated one level per step, so a long
    /// chain costs steps rather than stack depth.
    pub fn step(self, store: &DefinitionStore, cx: &mut ThreadCx<'_>) -> Result<Step> {
        match self {
            Effect::Done(value) => Ok(Step::Done(value)),
            Effect::Pending(pending) => Ok(match store.get(&pending.path) {
                Some(value) => Step::Progressed(Effect::Done(value.clone())),
                None => Step::Blocked(Effect::Pending(pending)),
            }),
            Effect::Then(first, next) => match *first {
                Effect::Done(value) => Ok(Step::Progressed(next(cx, value)?)),
                Effect::Pending(pending) => match store.get(&pending.path) {
                    Some(value) => Ok(Step::Progressed(next(cx, value.clone())?)),
                    None => Ok(Step::Blocked(Effect::Then(
                        Box::new(Effect::Pending(pending)),
                        next,
                    ))),
                },
                Effect::Then(inner, middle) => {
                    let rest: Continuation = Box::new(move |cx: &mut ThreadCx<'_>, value: Value| {
                        Ok(Effect::Then(Box::new(middle(cx, value)?), next))
                    });
                    Ok(Step::Progressed(Effect::Then(inner, rest)))
                }
            },
        }
    }

    /// Path of the leftmost pending lookup, if the effect is not finished.
    pub fn awaiting(&self) -> Option<&NamespacePath> {
        let mut cursor = self;
        loop {
            match cursor {
                Effect::Done(_) => return None,
                Effect::Pending(pending) => return Some(&pending.path),
                Effect::Then(first, _) => cursor = first,
            }
        }
    }

    /// Fire the never-defined callback of the leftmost pending lookup.
    pub fn into_stall(self) -> Option<Error> {
        let mut cursor = self;
        loop {
            match cursor {
                Effect::Done(_) => return None,
                Effect::Pending(Pending { path, on_never }) => return Some(on_never(&path)),
                Effect::Then(first, _) => cursor = *first,
            }
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Done(value) => write!(f, "Done({value})"),
            Effect::Pending(pending) => write!(f, "Pending({})", pending.path),
            Effect::Then(first, _) => write!(f, "Then({first:?}, ..)"),
        }
    }
}

/// Opaque handle passed to the host for one observable step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Mode {
    id: u64,
}

impl Mode {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Boundary to whatever performs observable effects (printing, files, ...).
pub trait EffectHost {
    fn perform(&mut self, mode: &Mode, request: &Value) -> Result<Value>;
}

/// Work registered by a thread, started once that thread finishes.
#[derive(Debug)]
pub struct Spawn {
    pub effect: Effect,
    pub observable: bool,
}

/// What a thread accumulates before it finishes.
#[derive(Debug, Default)]
pub struct Writes {
    pub puts: SmallVec<[(NamespacePath, Value); 4]>,
    pub spawns: Vec<Spawn>,
}

/// Per-thread context handed to every continuation.
pub struct ThreadCx<'a> {
    writes: &'a mut Writes,
    mode: Option<Mode>,
    host: Option<&'a mut dyn EffectHost>,
}

impl<'a> ThreadCx<'a> {
    /// Context for a thread that may not touch the outside world.
    pub fn pure(writes: &'a mut Writes) -> Self {
        Self {
            writes,
            mode: None,
            host: None,
        }
    }

    pub fn observable(writes: &'a mut Writes, mode: Mode, host: &'a mut dyn EffectHost) -> Self {
        Self {
            writes,
            mode: Some(mode),
            host: Some(host),
        }
    }

    /// Queue a definition; it lands in the store when the thread finishes.
    pub fn put(&mut self, path: NamespacePath, value: Value) {
        self.writes.puts.push((path, value));
    }

    pub fn defer(&mut self, effect: Effect) {
        self.writes.spawns.push(Spawn {
            effect,
            observable: false,
        });
    }

    /// Register a thread that runs only once static definitions have settled.
    pub fn defer_observable(&mut self, effect: Effect) {
        self.writes.spawns.push(Spawn {
            effect,
            observable: true,
        });
    }

    pub fn mode(&self) -> Option<&Mode> {
        self.mode.as_ref()
    }

    pub fn perform(&mut self, request: &Value) -> Result<Value> {
        match (self.mode.as_ref(), self.host.as_deref_mut()) {
            (Some(mode), Some(host)) => host.perform(mode, request),
            _ => Err(Error::Effect(format!(
                "observable request {request} outside an effect mode"
            ))),
        }
    }
}
