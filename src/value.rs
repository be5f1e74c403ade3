//! Runtime values: tagged tuples, closures over tuples, foreign payloads, and dexes.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::canon;
use crate::dex::Dex;
use crate::name::Name;
use crate::table::Table;
use crate::{Error, Result};

/// Purpose strings for the foreign payloads the engine itself produces.
pub mod purpose {
    pub const STRING: &str = "string";
    pub const NAME: &str = "name";
    pub const TABLE: &str = "table";
    pub const MACRO: &str = "macro";
    pub const CONSTRUCTOR: &str = "constructor";
}

/// Runtime type key of a tuple: constructor plus the sorted projection names.
///
/// Two declarations with the same constructor and the same projection set get
/// the same tag regardless of declaration order.
#[derive(Clone)]
pub struct TupleTag {
    constructor: Name,
    projections: Arc<[Name]>,
    id: [u8; 32],
}

impl TupleTag {
    pub fn new(constructor: Name, projections: impl IntoIterator<Item = Name>) -> Result<Self> {
        let mut projections: Vec<Name> = projections.into_iter().collect();
        projections.sort();
        if let Some(pair) = projections.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(Error::shape(
                constructor.to_string(),
                format!("projection `{}` declared twice", pair[0]),
            ));
        }
        let id = canon::digest(&canon::encode_tag(&constructor, &projections));
        Ok(Self {
            constructor,
            projections: projections.into(),
            id,
        })
    }

    /// Tag with no projections; cannot fail.
    pub fn unit(constructor: &str) -> Self {
        let constructor = Name::text(constructor);
        let id = canon::digest(&canon::encode_tag(&constructor, &[]));
        Self {
            constructor,
            projections: Arc::from(Vec::new()),
            id,
        }
    }

    pub fn constructor(&self) -> &Name {
        &self.constructor
    }

    pub fn projections(&self) -> &[Name] {
        &self.projections
    }

    pub fn arity(&self) -> usize {
        self.projections.len()
    }

    /// Position of a projection in the sorted field order.
    pub fn index_of(&self, projection: &Name) -> Option<usize> {
        self.projections.binary_search(projection).ok()
    }

    pub fn id(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn id_hex(&self) -> String {
        canon::to_hex(&self.id)
    }
}

impl PartialEq for TupleTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TupleTag {}

impl PartialOrd for TupleTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TupleTag {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.id == other.id {
            return Ordering::Equal;
        }
        self.constructor
            .cmp(&other.constructor)
            .then_with(|| self.projections.cmp(&other.projections))
    }
}

impl Hash for TupleTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TupleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.constructor)?;
        for (i, projection) in self.projections.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{projection}")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for TupleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TupleTag({self})")
    }
}

/// A constructed tuple; `fields` follow the tag's sorted projection order.
#[derive(Clone, Debug)]
pub struct Tuple {
    tag: TupleTag,
    fields: Arc<[Value]>,
}

impl Tuple {
    /// Build a tuple from `(projection, value)` pairs in any order.
    pub fn new(tag: TupleTag, fields: Vec<(Name, Value)>) -> Result<Self> {
        let mut slots: Vec<Option<Value>> = vec![None; tag.arity()];
        for (projection, value) in fields {
            let index = tag.index_of(&projection).ok_or_else(|| {
                Error::shape(
                    tag.constructor().to_string(),
                    format!("unknown projection `{projection}`"),
                )
            })?;
            if slots[index].replace(value).is_some() {
                return Err(Error::shape(
                    tag.constructor().to_string(),
                    format!("projection `{projection}` given twice"),
                ));
            }
        }
        let fields = slots
            .into_iter()
            .zip(tag.projections().iter())
            .map(|(slot, projection)| {
                slot.ok_or_else(|| {
                    Error::shape(
                        tag.constructor().to_string(),
                        format!("missing projection `{projection}`"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tag,
            fields: fields.into(),
        })
    }

    pub fn unit(constructor: &str) -> Self {
        Self {
            tag: TupleTag::unit(constructor),
            fields: Arc::from(Vec::new()),
        }
    }

    pub fn tag(&self) -> &TupleTag {
        &self.tag
    }

    /// Fields in sorted projection order.
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn get(&self, projection: &Name) -> Option<&Value> {
        self.tag.index_of(projection).map(|index| &self.fields[index])
    }
}

/// Code of a closure. A plain function pointer cannot capture, so everything a
/// closure knows lives in its environment tuple.
pub type ClosureCode = fn(&Tuple, &Value) -> Result<Value>;

#[derive(Clone)]
pub struct Closure {
    env: Tuple,
    code: ClosureCode,
}

impl Closure {
    pub fn new(env: Tuple, code: ClosureCode) -> Self {
        Self { env, code }
    }

    pub fn env(&self) -> &Tuple {
        &self.env
    }

    pub fn call(&self, argument: &Value) -> Result<Value> {
        (self.code)(&self.env, argument)
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure").field("env", &self.env).finish()
    }
}

/// Opaque host payload labelled with the purpose it serves.
#[derive(Clone)]
pub struct Foreign {
    purpose: Arc<str>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Foreign {
    pub fn new<T: Any + Send + Sync>(purpose: &str, payload: T) -> Self {
        Self {
            purpose: Arc::from(purpose),
            payload: Arc::new(payload),
        }
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Payload as `T` when the purpose matches and the type lines up.
    pub fn downcast<T: Any>(&self, purpose: &str) -> Option<&T> {
        if &*self.purpose != purpose {
            return None;
        }
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Foreign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Foreign({})", self.purpose)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Tuple(Tuple),
    Closure(Closure),
    Foreign(Foreign),
    Dex(Dex),
}

impl Value {
    /// The `nil` tuple, used as the unit result.
    pub fn nil() -> Self {
        Value::Tuple(Tuple::unit("nil"))
    }

    pub fn nope() -> Self {
        Value::Tuple(Tuple::unit("nope"))
    }

    pub fn yep(value: Value) -> Self {
        let tag = TupleTag {
            constructor: Name::text("yep"),
            projections: Arc::from(vec![Name::text("val")]),
            id: yep_id(),
        };
        Value::Tuple(Tuple {
            tag,
            fields: Arc::from(vec![value]),
        })
    }

    /// Build a tuple value from string projection names.
    pub fn tuple(constructor: &str, fields: Vec<(&str, Value)>) -> Result<Self> {
        let tag = TupleTag::new(
            Name::text(constructor),
            fields.iter().map(|(projection, _)| Name::text(projection)),
        )?;
        let fields = fields
            .into_iter()
            .map(|(projection, value)| (Name::text(projection), value))
            .collect();
        Ok(Value::Tuple(Tuple::new(tag, fields)?))
    }

    pub fn string(text: impl AsRef<str>) -> Self {
        Value::Foreign(Foreign::new(purpose::STRING, Arc::<str>::from(text.as_ref())))
    }

    pub fn name(name: Name) -> Self {
        Value::Foreign(Foreign::new(purpose::NAME, name))
    }

    pub fn table(table: Table) -> Self {
        Value::Foreign(Foreign::new(purpose::TABLE, table))
    }

    /// Tuple view; a closure is seen through its environment tuple.
    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Value::Tuple(tuple) => Some(tuple),
            Value::Closure(closure) => Some(closure.env()),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        match self {
            Value::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    pub fn as_foreign(&self, purpose: &str) -> Option<&Foreign> {
        match self {
            Value::Foreign(foreign) if foreign.purpose() == purpose => Some(foreign),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        self.as_foreign(purpose::STRING)
            .and_then(|foreign| foreign.downcast::<Arc<str>>(purpose::STRING))
            .map(|text| &**text)
    }

    pub fn as_name(&self) -> Option<&Name> {
        self.as_foreign(purpose::NAME)
            .and_then(|foreign| foreign.downcast::<Name>(purpose::NAME))
    }

    pub fn as_table(&self) -> Option<&Table> {
        self.as_foreign(purpose::TABLE)
            .and_then(|foreign| foreign.downcast::<Table>(purpose::TABLE))
    }

    pub fn as_dex(&self) -> Option<&Dex> {
        match self {
            Value::Dex(dex) => Some(dex),
            _ => None,
        }
    }

    /// `Some(Some(v))` for `yep{val: v}`, `Some(None)` for `nope`, `None` otherwise.
    pub fn as_maybe(&self) -> Option<Option<&Value>> {
        let Value::Tuple(tuple) = self else {
            return None;
        };
        match tuple.tag().constructor().as_text()? {
            "nope" if tuple.tag().arity() == 0 => Some(None),
            "yep" if tuple.tag().arity() == 1 => tuple.get(&Name::text("val")).map(Some),
            _ => None,
        }
    }

    pub fn is_constructed_by(&self, constructor: &str) -> bool {
        matches!(self, Value::Tuple(tuple) if tuple.tag().constructor().as_text() == Some(constructor))
    }
}

fn yep_id() -> [u8; 32] {
    static YEP: Lazy<[u8; 32]> = Lazy::new(|| {
        canon::digest(&canon::encode_tag(&Name::text("yep"), &[Name::text("val")]))
    });
    *YEP
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Tuple(tuple) => write_tuple(f, tuple),
            Value::Closure(closure) => {
                write!(f, "fn ")?;
                write_tuple(f, closure.env())
            }
            Value::Foreign(foreign) => {
                if let Some(text) = self.as_string() {
                    write!(f, "{text:?}")
                } else if let Some(name) = self.as_name() {
                    write!(f, "'{name}")
                } else if let Some(table) = self.as_table() {
                    write!(f, "table[{}]", table.len())
                } else {
                    write!(f, "<{}>", foreign.purpose())
                }
            }
            Value::Dex(dex) => write!(f, "{dex}"),
        }
    }
}

fn write_tuple(f: &mut fmt::Formatter<'_>, tuple: &Tuple) -> fmt::Result {
    write!(f, "{}", tuple.tag().constructor())?;
    if tuple.fields().is_empty() {
        return Ok(());
    }
    write!(f, "(")?;
    for (i, (projection, value)) in tuple
        .tag()
        .projections()
        .iter()
        .zip(tuple.fields().iter())
        .enumerate()
    {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{projection}={value}")?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_ignores_declaration_order() -> Result<()> {
        let a = TupleTag::new(Name::text("point"), [Name::text("x"), Name::text("y")])?;
        let b = TupleTag::new(Name::text("point"), [Name::text("y"), Name::text("x")])?;
        assert_eq!(a, b);
        assert_eq!(a.id_hex(), b.id_hex());

        let c = TupleTag::new(Name::text("point"), [Name::text("x"), Name::text("z")])?;
        assert_ne!(a, c);
        let d = TupleTag::new(Name::text("vec"), [Name::text("x"), Name::text("y")])?;
        assert_ne!(a, d);
        Ok(())
    }

    #[test]
    fn duplicate_projection_is_a_shape_error() {
        let err = TupleTag::new(Name::text("bad"), [Name::text("x"), Name::text("x")]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Shape);
    }

    #[test]
    fn tuple_fields_follow_sorted_projections() -> Result<()> {
        let value = Value::tuple(
            "point",
            vec![("y", Value::string("two")), ("x", Value::string("one"))],
        )?;
        let tuple = value.as_tuple().unwrap();
        assert_eq!(tuple.fields()[0].as_string(), Some("one"));
        assert_eq!(tuple.get(&Name::text("y")).and_then(Value::as_string), Some("two"));
        assert_eq!(value.to_string(), "point(x=\"one\" y=\"two\")");
        Ok(())
    }

    #[test]
    fn tuple_rejects_missing_and_unknown_fields() -> Result<()> {
        let tag = TupleTag::new(Name::text("pair"), [Name::text("a"), Name::text("b")])?;
        assert!(Tuple::new(tag.clone(), vec![(Name::text("a"), Value::nil())]).is_err());
        assert!(
            Tuple::new(
                tag,
                vec![
                    (Name::text("a"), Value::nil()),
                    (Name::text("b"), Value::nil()),
                    (Name::text("c"), Value::nil()),
                ],
            )
            .is_err()
        );
        Ok(())
    }

    #[test]
    fn yep_matches_declared_tag() -> Result<()> {
        let declared = TupleTag::new(Name::text("yep"), [Name::text("val")])?;
        let Value::Tuple(yep) = Value::yep(Value::nil()) else {
            panic!("yep is a tuple");
        };
        assert_eq!(yep.tag(), &declared);
        assert!(matches!(Value::nope().as_maybe(), Some(None)));
        Ok(())
    }

    #[test]
    fn closures_see_only_their_environment() -> Result<()> {
        fn get_greeting(env: &Tuple, _arg: &Value) -> Result<Value> {
            Ok(env.get(&Name::text("greeting")).cloned().unwrap_or_else(Value::nil))
        }
        let Value::Tuple(env) = Value::tuple("greeter", vec![("greeting", Value::string("hi"))])? else {
            panic!("tuple");
        };
        let closure = Closure::new(env, get_greeting);
        assert_eq!(closure.call(&Value::nil())?.as_string(), Some("hi"));
        assert!(Value::Closure(closure).as_tuple().is_some());
        Ok(())
    }
}
