//! Structural comparators ("dexes").
//!
//! A dex answers two questions about values: whether a value belongs to its
//! domain ([`Dex::has`]) and how two values compare ([`Dex::compare`]). The
//! comparison result is a total order on members extended with an explicit
//! incomparable marker that records which operands, taken alone, the dex would
//! have accepted. Combinators use those flags to decide which branch of a
//! composite comparator a value belongs to.
//!
//! Dexes are themselves values and are ordered by [`Dex::DexOfDexes`]: first by
//! a fixed rank per kind, then structurally within a kind.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::name::Name;
use crate::value::{Closure, TupleTag, Value};
use crate::{Error, Result};

/// Result of comparing two values with a dex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DexOrdering {
    Less,
    Equal,
    Greater,
    /// Neither ordered nor equal. `left`/`right` say whether that operand alone
    /// is a member of the comparator's domain.
    Incomparable { left: bool, right: bool },
}

impl DexOrdering {
    pub const NEITHER: DexOrdering = DexOrdering::Incomparable {
        left: false,
        right: false,
    };

    pub fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => DexOrdering::Less,
            Ordering::Equal => DexOrdering::Equal,
            Ordering::Greater => DexOrdering::Greater,
        }
    }

    /// `Some` for less/equal/greater.
    pub fn ordering(self) -> Option<Ordering> {
        match self {
            DexOrdering::Less => Some(Ordering::Less),
            DexOrdering::Equal => Some(Ordering::Equal),
            DexOrdering::Greater => Some(Ordering::Greater),
            DexOrdering::Incomparable { .. } => None,
        }
    }

    pub fn is_comparable(self) -> bool {
        self.ordering().is_some()
    }

    /// Swap the operands.
    pub fn reverse(self) -> Self {
        match self {
            DexOrdering::Less => DexOrdering::Greater,
            DexOrdering::Equal => DexOrdering::Equal,
            DexOrdering::Greater => DexOrdering::Less,
            DexOrdering::Incomparable { left, right } => DexOrdering::Incomparable {
                left: right,
                right: left,
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DexOrdering::Less => "less",
            DexOrdering::Equal => "equal",
            DexOrdering::Greater => "greater",
            DexOrdering::Incomparable { .. } => "incomparable",
        }
    }
}

/// Extension point for host-defined comparators.
pub trait ForeignDex: fmt::Debug + Send + Sync {
    /// Identity used when ordering foreign dexes against each other.
    fn identity(&self) -> Name;
    fn has(&self, value: &Value) -> Result<bool>;
    fn compare(&self, a: &Value, b: &Value) -> Result<DexOrdering>;
}

/// Struct-wise comparator over tuples of one tag.
#[derive(Clone, Debug)]
pub struct StructDex {
    tag: TupleTag,
    /// `(projection, index into the sorted fields, field dex)` in declared order.
    fields: Vec<(Name, usize, Dex)>,
}

impl StructDex {
    /// Fields are compared in the order given; every projection must appear once.
    pub fn new(tag: TupleTag, fields: Vec<(Name, Dex)>) -> Result<Self> {
        let mut seen = vec![false; tag.arity()];
        let mut resolved = Vec::with_capacity(fields.len());
        for (projection, dex) in fields {
            let index = tag.index_of(&projection).ok_or_else(|| {
                Error::shape("dex-struct", format!("`{tag}` has no projection `{projection}`"))
            })?;
            if std::mem::replace(&mut seen[index], true) {
                return Err(Error::shape(
                    "dex-struct",
                    format!("projection `{projection}` listed twice"),
                ));
            }
            resolved.push((projection, index, dex));
        }
        if let Some(missing) = seen.iter().position(|seen| !seen) {
            return Err(Error::shape(
                "dex-struct",
                format!("projection `{}` has no dex", tag.projections()[missing]),
            ));
        }
        Ok(Self {
            tag,
            fields: resolved,
        })
    }

    pub fn tag(&self) -> &TupleTag {
        &self.tag
    }

    fn has(&self, value: &Value) -> Result<bool> {
        let Some(tuple) = value.as_tuple().filter(|t| t.tag() == &self.tag) else {
            return Ok(false);
        };
        for (_, index, dex) in &self.fields {
            if !dex.has(&tuple.fields()[*index])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<DexOrdering> {
        let ta = a.as_tuple().filter(|t| t.tag() == &self.tag);
        let tb = b.as_tuple().filter(|t| t.tag() == &self.tag);
        let (ta, tb) = match (ta, tb) {
            (Some(ta), Some(tb)) => (ta, tb),
            _ => {
                return Ok(DexOrdering::Incomparable {
                    left: self.has(a)?,
                    right: self.has(b)?,
                });
            }
        };
        for (position, (_, index, dex)) in self.fields.iter().enumerate() {
            match dex.compare(&ta.fields()[*index], &tb.fields()[*index])? {
                DexOrdering::Equal => continue,
                DexOrdering::Incomparable { left, right } => {
                    // Earlier fields were equal, so each side stays a member
                    // exactly when its remaining fields are.
                    let rest = &self.fields[position + 1..];
                    let left = left && fields_accepted(rest, ta.fields())?;
                    let right = right && fields_accepted(rest, tb.fields())?;
                    return Ok(DexOrdering::Incomparable { left, right });
                }
                ordered => return Ok(ordered),
            }
        }
        Ok(DexOrdering::Equal)
    }
}

fn fields_accepted(rest: &[(Name, usize, Dex)], fields: &[Value]) -> Result<bool> {
    for (_, index, dex) in rest {
        if !dex.has(&fields[*index])? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A value paired with a dex that accepts it.
#[derive(Clone, Debug)]
pub struct Dexable {
    dex: Dex,
    value: Value,
}

impl Dexable {
    /// Fails with a domain error unless `dex` accepts `value`.
    pub fn new(dex: Dex, value: Value) -> Result<Self> {
        if !dex.has(&value)? {
            return Err(Error::domain(format!("{value} is not a member of {dex}")));
        }
        Ok(Self { dex, value })
    }

    pub fn dex(&self) -> &Dex {
        &self.dex
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Order by dex first, then by the shared dex over the values.
    pub fn compare(&self, other: &Dexable) -> Result<DexOrdering> {
        match compare_dexes(&self.dex, &other.dex)? {
            DexOrdering::Equal => self.dex.compare(&self.value, &other.value),
            different => Ok(different),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Dex {
    /// Declares every pair incomparable.
    GiveUp,
    /// Tries the first dex and falls back to the second.
    Default(Arc<Dex>, Arc<Dex>),
    Struct(Arc<StructDex>),
    /// Compares dex values.
    DexOfDexes,
    Name,
    String,
    /// Asks each value for its own dex through a getter closure.
    OwnMethod(Arc<Dexable>),
    /// Unwraps through a closure applied to the fix dex itself on each use.
    Fix(Arc<Dexable>),
    Foreign(Arc<dyn ForeignDex>),
}

impl Dex {
    pub fn default_of(first: Dex, second: Dex) -> Self {
        Dex::Default(Arc::new(first), Arc::new(second))
    }

    pub fn structure(tag: TupleTag, fields: Vec<(Name, Dex)>) -> Result<Self> {
        Ok(Dex::Struct(Arc::new(StructDex::new(tag, fields)?)))
    }

    /// `getter` must hold a closure returning `yep{val: dex}` or `nope`.
    pub fn own_method(getter: Dexable) -> Result<Self> {
        require_closure(&getter, "dex-by-own-method")?;
        Ok(Dex::OwnMethod(Arc::new(getter)))
    }

    /// `unwrap` must hold a closure mapping this fix dex to the dex it stands for.
    pub fn fix(unwrap: Dexable) -> Result<Self> {
        require_closure(&unwrap, "dex-fix")?;
        Ok(Dex::Fix(Arc::new(unwrap)))
    }

    /// Creation rank used for ordering dexes of different kinds.
    pub fn rank(&self) -> u8 {
        match self {
            Dex::Struct(_) => 0,
            Dex::Default(..) => 1,
            Dex::GiveUp => 2,
            Dex::DexOfDexes => 3,
            Dex::Name => 4,
            Dex::String => 5,
            Dex::OwnMethod(_) => 6,
            Dex::Fix(_) => 7,
            Dex::Foreign(_) => 8,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Dex::GiveUp => "give-up",
            Dex::Default(..) => "default",
            Dex::Struct(_) => "struct",
            Dex::DexOfDexes => "dex",
            Dex::Name => "name",
            Dex::String => "string",
            Dex::OwnMethod(_) => "own-method",
            Dex::Fix(_) => "fix",
            Dex::Foreign(_) => "foreign",
        }
    }

    /// Domain membership, independent of comparison.
    pub fn has(&self, value: &Value) -> Result<bool> {
        match self {
            Dex::GiveUp => Ok(false),
            Dex::Default(first, second) => Ok(first.has(value)? || second.has(value)?),
            Dex::Struct(dex) => dex.has(value),
            Dex::DexOfDexes => Ok(value.as_dex().is_some()),
            Dex::Name => Ok(value.as_name().is_some()),
            Dex::String => Ok(value.as_string().is_some()),
            Dex::OwnMethod(getter) => match nominate(getter, value)? {
                Some(own) => own.has(value),
                None => Ok(false),
            },
            Dex::Fix(_) => self.unwrap_fix()?.has(value),
            Dex::Foreign(dex) => dex.has(value),
        }
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Result<DexOrdering> {
        match self {
            Dex::GiveUp => Ok(DexOrdering::NEITHER),
            Dex::Default(first, second) => compare_default(first, second, a, b),
            Dex::Struct(dex) => dex.compare(a, b),
            Dex::DexOfDexes => match (a.as_dex(), b.as_dex()) {
                (Some(da), Some(db)) => compare_dexes(da, db),
                (None, None) => Err(Error::domain(format!(
                    "dex of dexes cannot compare non-dex values {a} and {b}"
                ))),
                (da, db) => Ok(DexOrdering::Incomparable {
                    left: da.is_some(),
                    right: db.is_some(),
                }),
            },
            Dex::Name => Ok(match (a.as_name(), b.as_name()) {
                (Some(na), Some(nb)) => DexOrdering::from_ordering(na.cmp(nb)),
                (na, nb) => DexOrdering::Incomparable {
                    left: na.is_some(),
                    right: nb.is_some(),
                },
            }),
            // Byte order of the UTF-8 text; not a stable contract.
            Dex::String => Ok(match (a.as_string(), b.as_string()) {
                (Some(sa), Some(sb)) => DexOrdering::from_ordering(sa.cmp(sb)),
                (sa, sb) => DexOrdering::Incomparable {
                    left: sa.is_some(),
                    right: sb.is_some(),
                },
            }),
            Dex::OwnMethod(getter) => compare_own_method(getter, a, b),
            Dex::Fix(_) => self.unwrap_fix()?.compare(a, b),
            Dex::Foreign(dex) => dex.compare(a, b),
        }
    }

    /// Compare two values that must both be members; a non-member is a domain error.
    pub fn compare_members(&self, a: &Value, b: &Value) -> Result<DexOrdering> {
        for value in [a, b] {
            if !self.has(value)? {
                return Err(Error::domain(format!("{value} is not a member of {self}")));
            }
        }
        self.compare(a, b)
    }

    fn unwrap_fix(&self) -> Result<Dex> {
        let Dex::Fix(unwrap) = self else {
            return Ok(self.clone());
        };
        let closure = require_closure(unwrap, "dex-fix")?;
        match closure.call(&Value::Dex(self.clone()))? {
            Value::Dex(dex) => Ok(dex),
            other => Err(Error::domain(format!("dex-fix unwrap returned non-dex {other}"))),
        }
    }
}

impl fmt::Display for Dex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dex::Default(first, second) => write!(f, "dex:default({first}, {second})"),
            Dex::Struct(dex) => write!(f, "dex:struct({})", dex.tag()),
            Dex::Foreign(dex) => write!(f, "dex:foreign({})", dex.identity()),
            other => write!(f, "dex:{}", other.kind()),
        }
    }
}

fn require_closure<'a>(dexable: &'a Dexable, form: &str) -> Result<&'a Closure> {
    dexable
        .value()
        .as_closure()
        .ok_or_else(|| Error::shape(form, format!("expected a closure, found {}", dexable.value())))
}

/// First dex decides; the second only weighs in for operands the first rejects.
///
/// Members of the first domain sort before values only the second accepts.
fn compare_default(first: &Dex, second: &Dex, a: &Value, b: &Value) -> Result<DexOrdering> {
    let (left, right) = match first.compare(a, b)? {
        DexOrdering::Incomparable { left, right } => (left, right),
        ordered => return Ok(ordered),
    };
    match (left, right) {
        (true, true) => Ok(DexOrdering::Incomparable {
            left: true,
            right: true,
        }),
        (true, false) => Ok(if second.has(b)? {
            DexOrdering::Less
        } else {
            DexOrdering::Incomparable {
                left: true,
                right: false,
            }
        }),
        (false, true) => Ok(if second.has(a)? {
            DexOrdering::Greater
        } else {
            DexOrdering::Incomparable {
                left: false,
                right: true,
            }
        }),
        (false, false) => second.compare(a, b),
    }
}

/// Ask the getter which dex `value` nominates for itself.
fn nominate(getter: &Dexable, value: &Value) -> Result<Option<Dex>> {
    let closure = require_closure(getter, "dex-by-own-method")?;
    let answer = closure.call(value)?;
    match answer.as_maybe() {
        Some(Some(Value::Dex(dex))) => Ok(Some(dex.clone())),
        Some(None) => Ok(None),
        _ => Err(Error::domain(format!(
            "own-method getter returned {answer}; expected yep(dex) or nope"
        ))),
    }
}

fn compare_own_method(getter: &Dexable, a: &Value, b: &Value) -> Result<DexOrdering> {
    let own_a = nominate(getter, a)?;
    let own_b = nominate(getter, b)?;
    match (own_a, own_b) {
        (None, None) => Ok(DexOrdering::NEITHER),
        (Some(da), None) => Ok(DexOrdering::Incomparable {
            left: da.has(a)?,
            right: false,
        }),
        (None, Some(db)) => Ok(DexOrdering::Incomparable {
            left: false,
            right: db.has(b)?,
        }),
        (Some(da), Some(db)) => match compare_dexes(&da, &db)? {
            DexOrdering::Equal => da.compare(a, b),
            order => {
                let left = da.has(a)?;
                let right = db.has(b)?;
                if left && right && order.is_comparable() {
                    Ok(order)
                } else {
                    Ok(DexOrdering::Incomparable { left, right })
                }
            }
        },
    }
}

/// Ordering of dex values: rank across kinds, structure within a kind.
pub fn compare_dexes(a: &Dex, b: &Dex) -> Result<DexOrdering> {
    let by_rank = a.rank().cmp(&b.rank());
    if by_rank != Ordering::Equal {
        return Ok(DexOrdering::from_ordering(by_rank));
    }
    match (a, b) {
        (Dex::Struct(sa), Dex::Struct(sb)) => {
            if Arc::ptr_eq(sa, sb) {
                return Ok(DexOrdering::Equal);
            }
            let by_shape = sa
                .tag
                .cmp(&sb.tag)
                .then_with(|| sa.fields.len().cmp(&sb.fields.len()));
            if by_shape != Ordering::Equal {
                return Ok(DexOrdering::from_ordering(by_shape));
            }
            for ((pa, _, da), (pb, _, db)) in sa.fields.iter().zip(sb.fields.iter()) {
                let by_projection = pa.cmp(pb);
                if by_projection != Ordering::Equal {
                    return Ok(DexOrdering::from_ordering(by_projection));
                }
                match compare_dexes(da, db)? {
                    DexOrdering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(DexOrdering::Equal)
        }
        (Dex::Default(fa, sa), Dex::Default(fb, sb)) => match compare_dexes(fa, fb)? {
            DexOrdering::Equal => compare_dexes(sa, sb),
            other => Ok(other),
        },
        (Dex::OwnMethod(ga), Dex::OwnMethod(gb)) | (Dex::Fix(ga), Dex::Fix(gb)) => {
            if Arc::ptr_eq(ga, gb) {
                return Ok(DexOrdering::Equal);
            }
            ga.compare(gb)
        }
        (Dex::Foreign(fa), Dex::Foreign(fb)) => {
            Ok(DexOrdering::from_ordering(fa.identity().cmp(&fb.identity())))
        }
        // Remaining kinds are singletons.
        _ => Ok(DexOrdering::Equal),
    }
}
