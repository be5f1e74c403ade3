//! Macro expansion of top-level forms into definitions.
//!
//! Every form becomes its own thread. A form's head is resolved by a pending
//! lookup of `macros/<head>`, so macros, constructors, and definitions all go
//! through the same forward-reference mechanism: a use may appear before the
//! form that defines it.
//!
//! Namespace layout under the expander's root:
//!
//! - `defs/<name>`: values bound by `def`
//! - `macros/<name>`: built-in macros and aliases
//! - `constructors/<name>`: tuple tags declared by `defstruct`
//! - `forms/rest^i/first/expanded`: set once the i-th form has expanded

use tracing::debug;

use crate::dex::{Dex, Dexable};
use crate::effect::{Effect, ThreadCx};
use crate::name::Name;
use crate::namespace::{Namespace, NamespacePath, PathKey};
use crate::scheduler::Scheduler;
use crate::store::DefinitionStore;
use crate::syntax::Syntax;
use crate::table::Table;
use crate::value::{Foreign, Tuple, TupleTag, Value, purpose};
use crate::{Error, Result};

pub type MacroFn = fn(&Expander, &mut ThreadCx<'_>, &[Syntax]) -> Result<Effect>;

/// A built-in macro, stored in the namespace as a `macro` foreign value.
#[derive(Clone, Copy)]
pub enum Macro {
    /// Allowed only at top level; commits definitions and yields `nil`.
    Definition(MacroFn),
    /// Allowed only inside another form; yields a value.
    Expression(MacroFn),
}

const BUILTINS: &[(&str, Macro)] = &[
    ("def", Macro::Definition(def)),
    ("defstruct", Macro::Definition(defstruct)),
    ("defmacro-alias", Macro::Definition(defmacro_alias)),
    ("print", Macro::Definition(print)),
    ("str", Macro::Expression(str_literal)),
    ("name", Macro::Expression(name_literal)),
    ("make", Macro::Expression(make)),
    ("proj", Macro::Expression(proj)),
    ("dex-give-up", Macro::Expression(dex_give_up)),
    ("dex-default", Macro::Expression(dex_default)),
    ("dex-struct", Macro::Expression(dex_struct)),
    ("dex-dex", Macro::Expression(dex_dex)),
    ("dex-name", Macro::Expression(dex_name)),
    ("dex-string", Macro::Expression(dex_string)),
    ("compare", Macro::Expression(compare)),
    ("table-empty", Macro::Expression(table_empty)),
    ("table-put", Macro::Expression(table_put)),
    ("table-del", Macro::Expression(table_del)),
    ("table-get", Macro::Expression(table_get)),
    ("table-union", Macro::Expression(table_union)),
];

#[derive(Clone, Debug)]
pub struct Expander {
    root: Namespace,
}

impl Expander {
    pub fn new(root: Namespace) -> Self {
        Self { root }
    }

    fn entry(&self, section: &'static str, name: &str) -> NamespacePath {
        self.root
            .get(PathKey::Tag(section))
            .get(Name::text(name))
            .path()
            .clone()
    }

    pub fn def_path(&self, name: &str) -> NamespacePath {
        self.entry("defs", name)
    }

    pub fn macro_path(&self, name: &str) -> NamespacePath {
        self.entry("macros", name)
    }

    pub fn constructor_path(&self, name: &str) -> NamespacePath {
        self.entry("constructors", name)
    }

    /// Batch binding every built-in macro under `macros/`.
    pub fn bootstrap(&self) -> Vec<(NamespacePath, Value)> {
        BUILTINS
            .iter()
            .map(|(name, mac)| {
                let value = Value::Foreign(Foreign::new(purpose::MACRO, *mac));
                (self.macro_path(name), value)
            })
            .collect()
    }

    /// Commit the built-ins and queue the program for expansion.
    pub fn load(&self, scheduler: &mut Scheduler, program: Vec<Syntax>) -> Result<()> {
        scheduler.commit(self.bootstrap())?;
        scheduler.spawn(self.program(program));
        Ok(())
    }

    /// Effect that spawns one expansion thread per top-level form.
    pub fn program(&self, forms: Vec<Syntax>) -> Effect {
        let expander = self.clone();
        Effect::done(Value::nil()).then(move |cx, _| {
            let mut ns = expander.root.get(PathKey::Tag("forms"));
            for form in forms {
                let unique = ns.get(PathKey::Tag("first"));
                debug!(namespace = %unique.path(), %form, "spawn expansion");
                cx.defer(expander.definition(unique, form));
                ns = ns.get(PathKey::Tag("rest"));
            }
            Ok(Effect::done(Value::nil()))
        })
    }

    /// Values bound under `defs/`, ordered by name.
    pub fn definitions<'s>(&self, store: &'s DefinitionStore) -> Vec<(&'s Name, &'s Value)> {
        let defs = self.root.get(PathKey::Tag("defs")).path().clone();
        store
            .entries()
            .into_iter()
            .filter(|(path, _)| path.parent().as_ref() == Some(&defs))
            .filter_map(|(path, value)| match path.last_key()? {
                PathKey::Name(name) => Some((name, value)),
                PathKey::Tag(_) => None,
            })
            .collect()
    }

    fn lookup_macro(&self, head: &str) -> Effect {
        let head = head.to_string();
        Effect::pending(self.macro_path(&head), move |_| {
            Error::shape(head.clone(), format!("unknown macro `{head}`"))
        })
    }

    fn constructor(&self, name: &str) -> Effect {
        Effect::get_or(self.constructor_path(name), format!("constructor `{name}`"))
    }

    /// Expand a top-level form, marking `unique/expanded` when done.
    fn definition(&self, unique: Namespace, syntax: Syntax) -> Effect {
        let (head, args) = match syntax {
            Syntax::Form { head, args } => (head, args),
            Syntax::Name(name) => {
                return fail(Error::shape(name, "expected a definition form at top level"));
            }
        };
        let expander = self.clone();
        let marker = unique.get(PathKey::Tag("expanded")).path().clone();
        self.lookup_macro(&head)
            .then(move |cx, found| match as_macro(&found, &head)? {
                Macro::Definition(expand) => expand(&expander, cx, &args),
                Macro::Expression(_) => Err(Error::shape(
                    head,
                    "expression macro used as a top-level definition",
                )),
            })
            .then(move |cx, _| {
                cx.put(marker, Value::nil());
                Ok(Effect::done(Value::nil()))
            })
    }

    /// Effect evaluating an expression: a bare name reads `defs/<name>`.
    pub fn expression(&self, syntax: &Syntax) -> Effect {
        match syntax {
            Syntax::Name(name) => {
                Effect::get_or(self.def_path(name), format!("reference to `{name}`"))
            }
            Syntax::Form { head, args } => {
                let expander = self.clone();
                let head = head.clone();
                let args = args.clone();
                self.lookup_macro(&head)
                    .then(move |cx, found| match as_macro(&found, &head)? {
                        Macro::Expression(expand) => expand(&expander, cx, &args),
                        Macro::Definition(_) => Err(Error::shape(
                            head,
                            "definition macro used as an expression",
                        )),
                    })
            }
        }
    }
}

fn fail(err: Error) -> Effect {
    Effect::done(Value::nil()).then(move |_, _| Err(err))
}

fn as_macro(value: &Value, head: &str) -> Result<Macro> {
    value
        .as_foreign(purpose::MACRO)
        .and_then(|foreign| foreign.downcast::<Macro>(purpose::MACRO))
        .copied()
        .ok_or_else(|| Error::shape(head, format!("`{head}` is bound to {value}, not a macro")))
}

fn tag_of(form: &str, value: &Value) -> Result<TupleTag> {
    value
        .as_foreign(purpose::CONSTRUCTOR)
        .and_then(|foreign| foreign.downcast::<TupleTag>(purpose::CONSTRUCTOR))
        .cloned()
        .ok_or_else(|| Error::shape(form, format!("{value} is not a constructor")))
}

fn dex_of(form: &str, value: &Value) -> Result<Dex> {
    value
        .as_dex()
        .cloned()
        .ok_or_else(|| Error::domain(format!("`{form}` expected a dex, found {value}")))
}

fn table_of(form: &str, value: &Value) -> Result<Table> {
    value
        .as_table()
        .cloned()
        .ok_or_else(|| Error::domain(format!("`{form}` expected a table, found {value}")))
}

fn arity<'s, const N: usize>(form: &str, args: &'s [Syntax]) -> Result<&'s [Syntax; N]> {
    args.try_into().map_err(|_| {
        Error::shape(
            form,
            format!("expected {N} argument(s), found {}", args.len()),
        )
    })
}

fn name_arg<'s>(form: &str, syntax: &'s Syntax) -> Result<&'s str> {
    syntax
        .as_name()
        .ok_or_else(|| Error::shape(form, format!("expected a name, found {syntax}")))
}

/// `(FIELD EXPR)` pairs after a constructor name.
fn field_pairs(form: &str, args: &[Syntax]) -> Result<(Vec<Name>, Vec<Syntax>)> {
    let mut names = Vec::with_capacity(args.len());
    let mut exprs = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Syntax::Form { head, args } if args.len() == 1 => {
                names.push(Name::text(head));
                exprs.push(args[0].clone());
            }
            other => {
                return Err(Error::shape(
                    form,
                    format!("expected (FIELD EXPR), found {other}"),
                ));
            }
        }
    }
    Ok((names, exprs))
}

fn split_constructor<'s>(form: &str, args: &'s [Syntax]) -> Result<(&'s str, &'s [Syntax])> {
    let (ctor, rest) = args
        .split_first()
        .ok_or_else(|| Error::shape(form, "expected a constructor name"))?;
    Ok((name_arg(form, ctor)?, rest))
}

type Finish = Box<dyn FnOnce(&mut ThreadCx<'_>, Vec<Value>) -> Result<Effect>>;

/// Evaluate `exprs` left to right, then hand all values to `finish`.
fn gather<F>(expander: &Expander, exprs: Vec<Syntax>, finish: F) -> Effect
where
    F: FnOnce(&mut ThreadCx<'_>, Vec<Value>) -> Result<Effect> + 'static,
{
    let pending = exprs.into_iter();
    gather_next(expander.clone(), pending, Vec::new(), Box::new(finish))
}

fn gather_next(
    expander: Expander,
    mut pending: std::vec::IntoIter<Syntax>,
    mut values: Vec<Value>,
    finish: Finish,
) -> Effect {
    match pending.next() {
        Some(expr) => expander.expression(&expr).then(move |_, value| {
            values.push(value);
            Ok(gather_next(expander, pending, values, finish))
        }),
        None => Effect::done(Value::nil()).then(move |cx, _| finish(cx, values)),
    }
}

/// Check arity, evaluate every argument, and pass the values as an array.
fn evaluate<const N: usize, F>(
    expander: &Expander,
    form: &'static str,
    args: &[Syntax],
    finish: F,
) -> Result<Effect>
where
    F: FnOnce([Value; N]) -> Result<Value> + 'static,
{
    let args = arity::<N>(form, args)?;
    Ok(gather(expander, args.to_vec(), move |_, values| {
        let found = values.len();
        let values: [Value; N] = values.try_into().map_err(|_| {
            Error::shape(form, format!("expected {N} value(s), found {found}"))
        })?;
        Ok(Effect::done(finish(values)?))
    }))
}

fn nil() -> Result<Effect> {
    Ok(Effect::done(Value::nil()))
}

fn def(expander: &Expander, _cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let [name, expr] = arity::<2>("def", args)?;
    let path = expander.def_path(name_arg("def", name)?);
    Ok(expander.expression(expr).then(move |cx, value| {
        cx.put(path, value);
        nil()
    }))
}

fn defstruct(expander: &Expander, cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let (ctor, fields) = split_constructor("defstruct", args)?;
    let projections = fields
        .iter()
        .map(|field| name_arg("defstruct", field).map(Name::text))
        .collect::<Result<Vec<_>>>()?;
    let tag = TupleTag::new(Name::text(ctor), projections)?;
    cx.put(
        expander.constructor_path(ctor),
        Value::Foreign(Foreign::new(purpose::CONSTRUCTOR, tag)),
    );
    nil()
}

fn defmacro_alias(expander: &Expander, _cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let [alias, target] = arity::<2>("defmacro-alias", args)?;
    let alias = expander.macro_path(name_arg("defmacro-alias", alias)?);
    let target = name_arg("defmacro-alias", target)?;
    Ok(expander.lookup_macro(target).then(move |cx, found| {
        cx.put(alias, found);
        nil()
    }))
}

/// Evaluates now; the print itself waits for the observable phase.
fn print(expander: &Expander, _cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let [expr] = arity::<1>("print", args)?;
    Ok(expander.expression(expr).then(|cx, value| {
        let text = match value.as_string() {
            Some(text) => text.to_string(),
            None => value.to_string(),
        };
        let request = Value::tuple("print", vec![("text", Value::string(text))])?;
        cx.defer_observable(Effect::done(Value::nil()).then(move |cx, _| {
            cx.perform(&request)?;
            nil()
        }));
        nil()
    }))
}

fn str_literal(_: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let [text] = arity::<1>("str", args)?;
    Ok(Effect::done(Value::string(name_arg("str", text)?)))
}

fn name_literal(_: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let [name] = arity::<1>("name", args)?;
    Ok(Effect::done(Value::name(Name::text(name_arg("name", name)?))))
}

fn make(expander: &Expander, _cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let (ctor, fields) = split_constructor("make", args)?;
    let (projections, exprs) = field_pairs("make", fields)?;
    let inner = expander.clone();
    Ok(expander.constructor(ctor).then(move |_, found| {
        let tag = tag_of("make", &found)?;
        Ok(gather(&inner, exprs, move |_, values| {
            let tuple = Tuple::new(tag, projections.into_iter().zip(values).collect())?;
            Ok(Effect::done(Value::Tuple(tuple)))
        }))
    }))
}

fn proj(expander: &Expander, _cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let [field, expr] = arity::<2>("proj", args)?;
    let field = Name::text(name_arg("proj", field)?);
    Ok(expander.expression(expr).map(move |value| {
        value
            .as_tuple()
            .and_then(|tuple| tuple.get(&field))
            .cloned()
            .ok_or_else(|| Error::shape("proj", format!("{value} has no projection `{field}`")))
    }))
}

fn dex_give_up(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<0, _>(expander, "dex-give-up", args, |[]| Ok(Value::Dex(Dex::GiveUp)))
}

fn dex_dex(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<0, _>(expander, "dex-dex", args, |[]| Ok(Value::Dex(Dex::DexOfDexes)))
}

fn dex_name(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<0, _>(expander, "dex-name", args, |[]| Ok(Value::Dex(Dex::Name)))
}

fn dex_string(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<0, _>(expander, "dex-string", args, |[]| Ok(Value::Dex(Dex::String)))
}

fn dex_default(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<2, _>(expander, "dex-default", args, |[first, second]| {
        Ok(Value::Dex(Dex::default_of(
            dex_of("dex-default", &first)?,
            dex_of("dex-default", &second)?,
        )))
    })
}

fn dex_struct(expander: &Expander, _cx: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    let (ctor, fields) = split_constructor("dex-struct", args)?;
    let (projections, exprs) = field_pairs("dex-struct", fields)?;
    let inner = expander.clone();
    Ok(expander.constructor(ctor).then(move |_, found| {
        let tag = tag_of("dex-struct", &found)?;
        Ok(gather(&inner, exprs, move |_, values| {
            let fields = projections
                .into_iter()
                .zip(values)
                .map(|(projection, value)| Ok((projection, dex_of("dex-struct", &value)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Effect::done(Value::Dex(Dex::structure(tag, fields)?)))
        }))
    }))
}

/// Yields the ordering label: `less`, `equal`, `greater`, or `incomparable`.
fn compare(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<3, _>(expander, "compare", args, |[dex, a, b]| {
        let ordering = dex_of("compare", &dex)?.compare(&a, &b)?;
        Ok(Value::string(ordering.label()))
    })
}

fn table_empty(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<0, _>(expander, "table-empty", args, |[]| Ok(Value::table(Table::empty())))
}

fn table_put(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<4, _>(expander, "table-put", args, |[dex, key, value, table]| {
        let key = Dexable::new(dex_of("table-put", &dex)?, key)?;
        let table = table_of("table-put", &table)?.shadow(key, Some(value))?;
        Ok(Value::table(table))
    })
}

fn table_del(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<3, _>(expander, "table-del", args, |[dex, key, table]| {
        let key = Dexable::new(dex_of("table-del", &dex)?, key)?;
        let table = table_of("table-del", &table)?.shadow(key, None)?;
        Ok(Value::table(table))
    })
}

/// Yields `yep{val}` for a present key, `nope` otherwise.
fn table_get(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<3, _>(expander, "table-get", args, |[dex, key, table]| {
        let key = Dexable::new(dex_of("table-get", &dex)?, key)?;
        Ok(match table_of("table-get", &table)?.get(&key)? {
            Some(value) => Value::yep(value.clone()),
            None => Value::nope(),
        })
    })
}

fn table_union(expander: &Expander, _: &mut ThreadCx<'_>, args: &[Syntax]) -> Result<Effect> {
    evaluate::<2, _>(expander, "table-union", args, |[a, b]| {
        let union = table_of("table-union", &a)?.union(&table_of("table-union", &b)?)?;
        Ok(Value::table(union))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::effect::{EffectHost, Mode};
    use crate::scheduler::RunReport;

    fn load(program: &str) -> Result<(Expander, Scheduler)> {
        let expander = Expander::new(Namespace::root());
        let mut scheduler = Scheduler::new();
        let forms = Syntax::parse_program(program).map_err(|err| Error::shape("json", err.to_string()))?;
        expander.load(&mut scheduler, forms)?;
        Ok((expander, scheduler))
    }

    fn expand(program: &str) -> Result<(Expander, Scheduler, RunReport)> {
        let (expander, mut scheduler) = load(program)?;
        let report = scheduler.run_pure()?;
        Ok((expander, scheduler, report))
    }

    fn lookup(expander: &Expander, scheduler: &Scheduler, name: &str) -> String {
        scheduler
            .store()
            .get(&expander.def_path(name))
            .map(Value::to_string)
            .unwrap_or_else(|| "<undefined>".to_string())
    }

    #[derive(Default)]
    struct Recorder {
        printed: Vec<String>,
    }

    impl EffectHost for Recorder {
        fn perform(&mut self, _mode: &Mode, request: &Value) -> Result<Value> {
            let text = request
                .as_tuple()
                .and_then(|tuple| tuple.get(&Name::text("text")))
                .and_then(Value::as_string)
                .ok_or_else(|| Error::Effect(format!("unsupported request {request}")))?;
            self.printed.push(text.to_string());
            Ok(Value::nil())
        }
    }

    #[test]
    fn forward_references_resolve_in_any_order() -> Result<()> {
        for program in [
            r#"[["def", "y", "x"], ["def", "x", ["str", "lit"]]]"#,
            r#"[["def", "x", ["str", "lit"]], ["def", "y", "x"]]"#,
        ] {
            let (expander, scheduler, report) = expand(program)?;
            assert!(report.is_success());
            assert_eq!(lookup(&expander, &scheduler, "x"), "\"lit\"");
            assert_eq!(lookup(&expander, &scheduler, "y"), "\"lit\"");
        }
        Ok(())
    }

    #[test]
    fn undefined_reference_stalls_with_context() -> Result<()> {
        let (expander, scheduler, report) =
            expand(r#"[["def", "y", "missing"], ["def", "ok", ["name", "fine"]]]"#)?;
        assert_eq!(report.stalls.len(), 1);
        assert_eq!(
            report.stalls[0].to_string(),
            "stalled waiting on /defs/missing (reference to `missing`)"
        );
        assert_eq!(lookup(&expander, &scheduler, "ok"), "'fine");
        Ok(())
    }

    #[test]
    fn unknown_macro_is_reported_after_settling() -> Result<()> {
        let (_, _, report) = expand(r#"[["frobnicate", "x"]]"#)?;
        assert_eq!(report.stalls.len(), 1);
        assert_eq!(report.stalls[0].kind(), ErrorKind::Shape);
        assert!(report.stalls[0].to_string().contains("unknown macro `frobnicate`"));
        Ok(())
    }

    #[test]
    fn macros_used_in_the_wrong_position_are_shape_errors() {
        for program in [
            r#"[["def", "x", ["def", "y", ["str", "a"]]]]"#,
            r#"[["str", "a"]]"#,
            r#"["bare"]"#,
            r#"[["def", "x"]]"#,
        ] {
            let err = expand(program).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Shape, "{program}");
        }
    }

    #[test]
    fn redefinition_is_a_duplicate() {
        let err = expand(r#"[["def", "x", ["str", "a"]], ["def", "x", ["str", "b"]]]"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn aliases_resolve_forward() -> Result<()> {
        let (expander, scheduler, report) = expand(
            r#"[["define", "x", ["str", "a"]], ["defmacro-alias", "define", "def"]]"#,
        )?;
        assert!(report.is_success());
        assert_eq!(lookup(&expander, &scheduler, "x"), "\"a\"");
        Ok(())
    }

    #[test]
    fn structs_and_struct_dexes() -> Result<()> {
        let (expander, scheduler, report) = expand(
            r#"[
                ["def", "p", ["make", "point", ["y", ["str", "b"]], ["x", ["str", "a"]]]],
                ["def", "q", ["make", "point", ["x", ["str", "a"]], ["y", ["str", "c"]]]],
                ["def", "d", ["dex-struct", "point", ["x", ["dex-string"]], ["y", ["dex-string"]]]],
                ["def", "pq", ["compare", "d", "p", "q"]],
                ["def", "qp", ["compare", "d", "q", "p"]],
                ["def", "pp", ["compare", "d", "p", "p"]],
                ["def", "odd", ["compare", "d", "p", ["str", "a"]]],
                ["def", "px", ["proj", "x", "p"]],
                ["defstruct", "point", "x", "y"]
            ]"#,
        )?;
        assert!(report.is_success());
        assert_eq!(lookup(&expander, &scheduler, "p"), "point(x=\"a\" y=\"b\")");
        assert_eq!(lookup(&expander, &scheduler, "pq"), "\"less\"");
        assert_eq!(lookup(&expander, &scheduler, "qp"), "\"greater\"");
        assert_eq!(lookup(&expander, &scheduler, "pp"), "\"equal\"");
        assert_eq!(lookup(&expander, &scheduler, "odd"), "\"incomparable\"");
        assert_eq!(lookup(&expander, &scheduler, "px"), "\"a\"");
        Ok(())
    }

    #[test]
    fn make_rejects_unknown_fields() {
        let err = expand(
            r#"[["defstruct", "point", "x"], ["def", "p", ["make", "point", ["z", ["str", "a"]]]]]"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn default_dex_orders_domains() -> Result<()> {
        let (expander, scheduler, _) = expand(
            r#"[
                ["def", "d", ["dex-default", ["dex-name"], ["dex-string"]]],
                ["def", "c", ["compare", "d", ["name", "z"], ["str", "a"]]],
                ["def", "dd", ["compare", ["dex-dex"], ["dex-name"], ["dex-string"]]]
            ]"#,
        )?;
        assert_eq!(lookup(&expander, &scheduler, "c"), "\"less\"");
        assert_eq!(lookup(&expander, &scheduler, "dd"), "\"less\"");
        Ok(())
    }

    #[test]
    fn tables_put_get_delete_and_union() -> Result<()> {
        let (expander, scheduler, report) = expand(
            r#"[
                ["def", "a", ["table-put", ["dex-string"], ["str", "k"], ["str", "from-a"], ["table-empty"]]],
                ["def", "b0", ["table-put", ["dex-string"], ["str", "k"], ["str", "from-b"], ["table-empty"]]],
                ["def", "b", ["table-put", ["dex-string"], ["str", "j"], ["str", "only-b"], "b0"]],
                ["def", "ab", ["table-union", "a", "b"]],
                ["def", "k", ["table-get", ["dex-string"], ["str", "k"], "ab"]],
                ["def", "j", ["table-get", ["dex-string"], ["str", "j"], "ab"]],
                ["def", "gone", ["table-get", ["dex-string"], ["str", "k"],
                    ["table-del", ["dex-string"], ["str", "k"], "a"]]]
            ]"#,
        )?;
        assert!(report.is_success());
        assert_eq!(lookup(&expander, &scheduler, "ab"), "table[2]");
        assert_eq!(lookup(&expander, &scheduler, "k"), "yep(val=\"from-a\")");
        assert_eq!(lookup(&expander, &scheduler, "j"), "yep(val=\"only-b\")");
        assert_eq!(lookup(&expander, &scheduler, "gone"), "nope");
        Ok(())
    }

    #[test]
    fn table_keys_must_belong_to_the_dex() {
        let err = expand(
            r#"[["def", "t", ["table-put", ["dex-name"], ["str", "k"], ["str", "v"], ["table-empty"]]]]"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn prints_run_only_after_definitions_settle() -> Result<()> {
        let (_, mut scheduler) = load(
            r#"[["print", "greeting"], ["print", ["str", "plain"]], ["def", "greeting", ["str", "hello"]]]"#,
        )?;
        let mut host = Recorder::default();
        let report = scheduler.run(&mut host)?.into_result()?;
        assert_eq!(report.skipped_observable, 0);
        let mut printed = host.printed.clone();
        printed.sort();
        assert_eq!(printed, ["hello", "plain"]);
        Ok(())
    }

    #[test]
    fn stalled_programs_print_nothing() -> Result<()> {
        let (_, mut scheduler) = load(r#"[["print", ["str", "early"]], ["def", "x", "never"]]"#)?;
        let mut host = Recorder::default();
        let report = scheduler.run(&mut host)?;
        assert_eq!(report.stalls.len(), 1);
        assert_eq!(report.skipped_observable, 1);
        assert!(host.printed.is_empty());
        Ok(())
    }

    #[test]
    fn forms_are_marked_expanded() -> Result<()> {
        let (_, scheduler, _) = expand(
            r#"[["def", "a", ["str", "1"]], ["def", "b", ["str", "2"]], ["def", "c", ["str", "3"]]]"#,
        )?;
        let markers: Vec<String> = scheduler
            .store()
            .entries()
            .into_iter()
            .map(|(path, _)| path.to_string())
            .filter(|path| path.starts_with("/forms"))
            .collect();
        assert_eq!(
            markers,
            [
                "/forms/first/expanded",
                "/forms/rest/first/expanded",
                "/forms/rest^2/first/expanded",
            ]
        );
        Ok(())
    }

    #[test]
    fn definitions_lists_defs_only() -> Result<()> {
        let (expander, scheduler, _) = expand(
            r#"[["defstruct", "unit"], ["def", "b", ["make", "unit"]], ["def", "a", ["dex-give-up"]]]"#,
        )?;
        let listed: Vec<String> = expander
            .definitions(scheduler.store())
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        assert_eq!(listed, ["a=dex:give-up", "b=unit"]);
        Ok(())
    }
}
