//! Hierarchical namespace identity with shadowing and repeat compression.
//!
//! A [`NamespacePath`] is an immutable chain of `(parent, key, repeat)` nodes
//! ending at a shared root sentinel. Each node carries a SHA-256 digest of its
//! parent's digest, its key and its repeat count, so equality and hashing never
//! walk the chain.
//!
//! Runs of one key stay plain, one node per step, up to the configured bound.
//! The step that would take a run past the bound folds the whole run into a
//! single counted node, and every later repeat bumps that node's count. A run
//! of any length therefore costs at most `max_repeat` nodes.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::canon;
use crate::name::Name;

/// Repeat bound used by [`Namespace::root`].
pub const DEFAULT_MAX_REPEAT: u32 = 1000;

static ROOT: Lazy<NamespacePath> = Lazy::new(|| {
    let mut buf = Vec::new();
    canon::push_array(&mut buf, 0);
    NamespacePath(Arc::new(PathNode {
        link: None,
        run: 0,
        bound: DEFAULT_MAX_REPEAT,
        depth: 0,
        digest: canon::digest(&buf),
    }))
});

/// Key of a single path step.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathKey {
    /// Literal tag chosen by the engine (`defs`, `macros`, ...).
    Tag(&'static str),
    /// Structural name chosen by a program.
    Name(Name),
}

impl PathKey {
    fn encode(&self, buf: &mut Vec<u8>) {
        canon::push_array(buf, 2);
        match self {
            PathKey::Tag(tag) => {
                canon::push_uint(buf, 0);
                canon::push_text(buf, tag);
            }
            PathKey::Name(name) => {
                canon::push_uint(buf, 1);
                canon::push_name(buf, name);
            }
        }
    }
}

impl From<Name> for PathKey {
    fn from(name: Name) -> Self {
        PathKey::Name(name)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Tag(tag) => write!(f, "{tag}"),
            PathKey::Name(name) => write!(f, "{name}"),
        }
    }
}

struct Link {
    parent: NamespacePath,
    key: PathKey,
    /// 1 for a plain step; above the bound for a folded run.
    repeat: u64,
}

struct PathNode {
    /// `None` only at the root.
    link: Option<Link>,
    /// Length of the plain run of this key ending here; 0 on counted nodes.
    run: u32,
    /// Repeat bound the node was built under.
    bound: u32,
    depth: u64,
    digest: [u8; 32],
}

impl Drop for PathNode {
    // Unlink iteratively; dropping a long chain recursively overflows the stack.
    fn drop(&mut self) {
        let mut next = self.link.take().map(|link| link.parent);
        while let Some(path) = next {
            next = match Arc::try_unwrap(path.0) {
                Ok(mut node) => node.link.take().map(|link| link.parent),
                Err(_) => None,
            };
        }
    }
}

/// Structural identity of a namespace; the definition store is keyed by it.
#[derive(Clone)]
pub struct NamespacePath(Arc<PathNode>);

impl NamespacePath {
    pub fn root() -> Self {
        ROOT.clone()
    }

    pub fn is_root(&self) -> bool {
        self.0.link.is_none()
    }

    fn node(parent: &NamespacePath, key: PathKey, repeat: u64, run: u32, bound: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        canon::push_array(&mut buf, 3);
        canon::push_bytes(&mut buf, &parent.0.digest);
        key.encode(&mut buf);
        canon::push_uint(&mut buf, repeat);
        NamespacePath(Arc::new(PathNode {
            depth: parent.0.depth + repeat,
            digest: canon::digest(&buf),
            link: Some(Link {
                parent: parent.clone(),
                key,
                repeat,
            }),
            run,
            bound,
        }))
    }

    /// Derive the child reached through `key`, folding runs longer than `max_repeat`.
    pub fn child(&self, key: PathKey, max_repeat: u32) -> Self {
        let bound = max_repeat.max(1);
        let Some(link) = self.0.link.as_ref().filter(|link| link.key == key) else {
            return Self::node(self, key, 1, 1, bound);
        };
        if link.repeat > 1 {
            return Self::node(&link.parent, key, link.repeat + 1, 0, bound);
        }
        let run = self.0.run;
        if run < bound {
            return Self::node(self, key, 1, run + 1, bound);
        }
        let start = self.ancestor(run);
        Self::node(&start, key, u64::from(run) + 1, 0, bound)
    }

    fn ancestor(&self, steps: u32) -> NamespacePath {
        let mut cursor = self.clone();
        for _ in 0..steps {
            let Some(parent) = cursor.0.link.as_ref().map(|link| link.parent.clone()) else {
                break;
            };
            cursor = parent;
        }
        cursor
    }

    /// Path one step up; `None` at the root.
    pub fn parent(&self) -> Option<NamespacePath> {
        let link = self.0.link.as_ref()?;
        if link.repeat == 1 {
            return Some(link.parent.clone());
        }
        let bound = self.0.bound;
        let remaining = link.repeat - 1;
        if remaining > u64::from(bound) {
            return Some(Self::node(&link.parent, link.key.clone(), remaining, 0, bound));
        }
        // Back under the bound: the run is plain again.
        let mut path = link.parent.clone();
        for _ in 0..remaining {
            path = path.child(link.key.clone(), bound);
        }
        Some(path)
    }

    /// Key of the last step.
    pub fn last_key(&self) -> Option<&PathKey> {
        self.0.link.as_ref().map(|link| &link.key)
    }

    /// Number of nodes in the chain, the root included.
    pub fn node_count(&self) -> usize {
        let mut count = 1;
        let mut cursor = self;
        while let Some(link) = &cursor.0.link {
            count += 1;
            cursor = &link.parent;
        }
        count
    }

    /// Number of key steps this path stands for, repeats expanded.
    pub fn depth(&self) -> u64 {
        self.0.depth
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.0.digest
    }

    fn segments(&self) -> Vec<(&PathKey, u64)> {
        let mut out = Vec::new();
        let mut cursor = self;
        while let Some(link) = &cursor.0.link {
            out.push((&link.key, link.repeat));
            cursor = &link.parent;
        }
        out.reverse();
        out
    }
}

impl PartialEq for NamespacePath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.digest == other.0.digest
    }
}

impl Eq for NamespacePath {}

impl PartialOrd for NamespacePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NamespacePath {
    /// Lexicographic over the node sequence from the root.
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        self.segments().cmp(&other.segments())
    }
}

impl Hash for NamespacePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.digest.hash(state);
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        let mut segments = self.segments().into_iter().peekable();
        while let Some((key, mut repeat)) = segments.next() {
            while let Some((_, more)) = segments.next_if(|(next, _)| *next == key) {
                repeat += more;
            }
            write!(f, "/{key}")?;
            if repeat > 1 {
                write!(f, "^{repeat}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespacePath({self})")
    }
}

/// A namespace: a path plus local shadows that redirect selected keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace {
    path: NamespacePath,
    shadows: Arc<BTreeMap<PathKey, Namespace>>,
    max_repeat: u32,
}

impl Namespace {
    pub fn root() -> Self {
        Self::root_with_max_repeat(DEFAULT_MAX_REPEAT)
    }

    /// Root namespace whose derived paths compress runs up to `max_repeat` (at least 1).
    pub fn root_with_max_repeat(max_repeat: u32) -> Self {
        Self {
            path: NamespacePath::root(),
            shadows: Arc::default(),
            max_repeat: max_repeat.max(1),
        }
    }

    pub fn path(&self) -> &NamespacePath {
        &self.path
    }

    pub fn max_repeat(&self) -> u32 {
        self.max_repeat
    }

    /// Sub-namespace for `key`: a shadow if one is installed, else the structural child.
    pub fn get(&self, key: impl Into<PathKey>) -> Namespace {
        let key = key.into();
        if let Some(shadowed) = self.shadows.get(&key) {
            return shadowed.clone();
        }
        Namespace {
            path: self.path.child(key, self.max_repeat),
            shadows: Arc::default(),
            max_repeat: self.max_repeat,
        }
    }

    /// Shorthand for `get(PathKey::Name(name))`.
    pub fn get_name(&self, name: &Name) -> Namespace {
        self.get(PathKey::Name(name.clone()))
    }

    /// Copy of this namespace in which `key` resolves to `target`.
    pub fn shadow(&self, key: impl Into<PathKey>, target: Namespace) -> Namespace {
        let mut shadows = (*self.shadows).clone();
        shadows.insert(key.into(), target);
        Namespace {
            path: self.path.clone(),
            shadows: Arc::new(shadows),
            max_repeat: self.max_repeat,
        }
    }
}
