//! Cinder: forward-reference resolution and macro expansion over a write-once
//! namespace, plus the structural comparator ("dex") algebra used by tables.

pub mod canon;
pub mod config;
pub mod dex;
pub mod effect;
pub mod error;
pub mod expand;
pub mod name;
pub mod namespace;
pub mod scheduler;
pub mod store;
pub mod syntax;
pub mod table;
pub mod value;

pub use config::RuntimeConfig;
pub use dex::{Dex, DexOrdering, Dexable, ForeignDex};
pub use effect::{Effect, EffectHost, Mode, ThreadCx};
pub use error::{Error, ErrorKind, Result};
pub use expand::Expander;
pub use name::Name;
pub use namespace::{Namespace, NamespacePath, PathKey};
pub use scheduler::{RunReport, Scheduler};
pub use store::DefinitionStore;
pub use syntax::Syntax;
pub use table::Table;
pub use value::{Closure, Foreign, Tuple, TupleTag, Value};
