//! Structural names: the deep, totally ordered keys used for constructors,
//! projections, and namespace lookups.

use std::fmt;
use std::sync::Arc;

/// A name is either a text atom or a headed node of child names.
///
/// Ordering is structural: atoms sort before nodes, atoms by text, nodes by
/// head and then children lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Name {
    Text(Arc<str>),
    Node(Arc<str>, Arc<[Name]>),
}

impl Name {
    pub fn text(text: impl AsRef<str>) -> Self {
        Name::Text(Arc::from(text.as_ref()))
    }

    pub fn node(head: impl AsRef<str>, children: impl IntoIterator<Item = Name>) -> Self {
        Name::Node(Arc::from(head.as_ref()), children.into_iter().collect())
    }

    /// The atom text, if this is an atom.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Name::Text(text) => Some(text),
            Name::Node(..) => None,
        }
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Name::text(text)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Text(text) => write!(f, "{text}"),
            Name::Node(head, children) => {
                write!(f, "({head}")?;
                for child in children.iter() {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_structural() {
        let a = Name::text("a");
        let b = Name::text("b");
        let node = Name::node("a", [Name::text("z")]);
        assert!(a < b);
        assert!(b < node);
        assert_eq!(
            Name::node("pair", [a.clone(), b.clone()]),
            Name::node("pair", [Name::text("a"), Name::text("b")])
        );
        assert!(Name::node("pair", [a.clone(), a.clone()]) < Name::node("pair", [a, b]));
    }

    #[test]
    fn display_nests_children() {
        let name = Name::node("ctor", [Name::text("point"), Name::node("ns", [])]);
        assert_eq!(name.to_string(), "(ctor point (ns))");
    }
}
