//! Persistent AVL table keyed by dexables.
//!
//! Updates copy the path from the root to the touched node and share every
//! other subtree, so old versions stay valid and cheap to keep around.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::dex::{DexOrdering, Dexable};
use crate::value::Value;
use crate::{Error, Result};

type Link = Option<Arc<Node>>;

#[derive(Debug)]
struct Node {
    key: Dexable,
    value: Value,
    height: u32,
    len: usize,
    left: Link,
    right: Link,
}

fn height(link: &Link) -> u32 {
    link.as_ref().map_or(0, |node| node.height)
}

fn size(link: &Link) -> usize {
    link.as_ref().map_or(0, |node| node.len)
}

fn make(key: Dexable, value: Value, left: Link, right: Link) -> Arc<Node> {
    Arc::new(Node {
        height: 1 + height(&left).max(height(&right)),
        len: 1 + size(&left) + size(&right),
        key,
        value,
        left,
        right,
    })
}

/// Rebuild a node, rotating once or twice when the subtrees differ by more than one.
fn balance(key: Dexable, value: Value, left: Link, right: Link) -> Arc<Node> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        if let Some(l) = &left {
            if height(&l.left) >= height(&l.right) {
                let new_right = make(key, value, l.right.clone(), right);
                return make(l.key.clone(), l.value.clone(), l.left.clone(), Some(new_right));
            }
            if let Some(lr) = &l.right {
                let new_left = make(l.key.clone(), l.value.clone(), l.left.clone(), lr.left.clone());
                let new_right = make(key, value, lr.right.clone(), right);
                return make(lr.key.clone(), lr.value.clone(), Some(new_left), Some(new_right));
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            if height(&r.right) >= height(&r.left) {
                let new_left = make(key, value, left, r.left.clone());
                return make(r.key.clone(), r.value.clone(), Some(new_left), r.right.clone());
            }
            if let Some(rl) = &r.left {
                let new_left = make(key, value, left, rl.left.clone());
                let new_right = make(r.key.clone(), r.value.clone(), rl.right.clone(), r.right.clone());
                return make(rl.key.clone(), rl.value.clone(), Some(new_left), Some(new_right));
            }
        }
    }
    make(key, value, left, right)
}

/// Order of `key` relative to a stored key; incomparable keys are a domain error.
fn locate(key: &Dexable, stored: &Dexable) -> Result<Ordering> {
    match key.compare(stored)? {
        DexOrdering::Incomparable { .. } => Err(Error::domain(format!(
            "table key {} is incomparable with stored key {}",
            key.value(),
            stored.value()
        ))),
        ordered => Ok(ordered.ordering().unwrap_or(Ordering::Equal)),
    }
}

fn insert(link: &Link, key: Dexable, value: Value) -> Result<Arc<Node>> {
    let Some(node) = link else {
        return Ok(make(key, value, None, None));
    };
    Ok(match locate(&key, &node.key)? {
        Ordering::Equal => make(key, value, node.left.clone(), node.right.clone()),
        Ordering::Less => {
            let left = insert(&node.left, key, value)?;
            balance(node.key.clone(), node.value.clone(), Some(left), node.right.clone())
        }
        Ordering::Greater => {
            let right = insert(&node.right, key, value)?;
            balance(node.key.clone(), node.value.clone(), node.left.clone(), Some(right))
        }
    })
}

/// Detach the minimum entry, returning it and the remaining subtree.
fn take_min(node: &Arc<Node>) -> (Dexable, Value, Link) {
    match &node.left {
        None => (node.key.clone(), node.value.clone(), node.right.clone()),
        Some(left) => {
            let (key, value, rest) = take_min(left);
            let rebuilt = balance(node.key.clone(), node.value.clone(), rest, node.right.clone());
            (key, value, Some(rebuilt))
        }
    }
}

/// `Ok(None)` when the key was absent, so callers can keep sharing the old tree.
fn remove(link: &Link, key: &Dexable) -> Result<Option<Link>> {
    let Some(node) = link else {
        return Ok(None);
    };
    match locate(key, &node.key)? {
        Ordering::Equal => Ok(Some(match (&node.left, &node.right) {
            (None, right) => right.clone(),
            (left, None) => left.clone(),
            (left, Some(right)) => {
                let (key, value, rest) = take_min(right);
                Some(balance(key, value, left.clone(), rest))
            }
        })),
        Ordering::Less => Ok(remove(&node.left, key)?.map(|left| {
            Some(balance(node.key.clone(), node.value.clone(), left, node.right.clone()))
        })),
        Ordering::Greater => Ok(remove(&node.right, key)?.map(|right| {
            Some(balance(node.key.clone(), node.value.clone(), node.left.clone(), right))
        })),
    }
}

#[derive(Clone, Debug, Default)]
pub struct Table {
    root: Link,
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn get(&self, key: &Dexable) -> Result<Option<&Value>> {
        let mut cursor = &self.root;
        while let Some(node) = cursor {
            match locate(key, &node.key)? {
                Ordering::Equal => return Ok(Some(&node.value)),
                Ordering::Less => cursor = &node.left,
                Ordering::Greater => cursor = &node.right,
            }
        }
        Ok(None)
    }

    /// Insert when `value` is present, remove when it is absent.
    pub fn shadow(&self, key: Dexable, value: Option<Value>) -> Result<Table> {
        match value {
            Some(value) => Ok(Table {
                root: Some(insert(&self.root, key, value)?),
            }),
            None => self.remove(&key),
        }
    }

    pub fn remove(&self, key: &Dexable) -> Result<Table> {
        Ok(match remove(&self.root, key)? {
            Some(root) => Table { root },
            None => self.clone(),
        })
    }

    /// Entries of both tables; `self` wins on keys present in both.
    pub fn union(&self, other: &Table) -> Result<Table> {
        let (mut base, extra, base_wins) = if self.len() >= other.len() {
            (self.clone(), other, true)
        } else {
            (other.clone(), self, false)
        };
        for (key, value) in extra.iter() {
            if base_wins {
                if base.get(key)?.is_none() {
                    base = base.shadow(key.clone(), Some(value.clone()))?;
                }
            } else {
                base = base.shadow(key.clone(), Some(value.clone()))?;
            }
        }
        Ok(base)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Dexable, &Value)> {
        let mut stack = Vec::new();
        push_left(&mut stack, &self.root);
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            push_left(&mut stack, &node.right);
            Some((&node.key, &node.value))
        })
    }
}

fn push_left<'a>(stack: &mut Vec<&'a Node>, mut link: &'a Link) {
    while let Some(node) = link {
        stack.push(node);
        link = &node.left;
    }
}
