//! Syntax trees handed over by the reader.
//!
//! The interchange format is JSON: a string is a name, a non-empty array
//! headed by a string is a form. A program is an array of forms.

use std::fmt;

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSyntax")]
pub enum Syntax {
    Name(String),
    Form { head: String, args: Vec<Syntax> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSyntax {
    Name(String),
    List(Vec<RawSyntax>),
}

impl TryFrom<RawSyntax> for Syntax {
    type Error = String;

    fn try_from(raw: RawSyntax) -> Result<Self, Self::Error> {
        match raw {
            RawSyntax::Name(name) => Ok(Syntax::Name(name)),
            RawSyntax::List(items) => {
                let mut items = items.into_iter();
                let head = match items.next() {
                    Some(RawSyntax::Name(head)) => head,
                    Some(RawSyntax::List(_)) => return Err("form head must be a name".into()),
                    None => return Err("empty form".into()),
                };
                let args = items.map(Syntax::try_from).collect::<Result<_, _>>()?;
                Ok(Syntax::Form { head, args })
            }
        }
    }
}

impl Syntax {
    pub fn form(head: &str, args: Vec<Syntax>) -> Self {
        Syntax::Form {
            head: head.to_string(),
            args,
        }
    }

    pub fn name(name: &str) -> Self {
        Syntax::Name(name.to_string())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Syntax::Name(name) => Some(name),
            Syntax::Form { .. } => None,
        }
    }

    /// Parse a JSON array of forms.
    pub fn parse_program(text: &str) -> serde_json::Result<Vec<Syntax>> {
        serde_json::from_str(text)
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syntax::Name(name) => write!(f, "{name}"),
            Syntax::Form { head, args } => {
                write!(f, "({head}")?;
                for arg in args {
                    write!(f, " {arg}")?;
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
    fn parses_names_and_forms() -> serde_json::Result<()> {
        let program = Syntax::parse_program(r#"[["def", "x", ["str", "hi"]], ["print", "x"]]"#)?;
        assert_eq!(program.len(), 2);
        assert_eq!(
            program[0],
            Syntax::form(
                "def",
                vec![Syntax::name("x"), Syntax::form("str", vec![Syntax::name("hi")])]
            )
        );
        assert_eq!(program[1].to_string(), "(print x)");
        Ok(())
    }

    #[test]
    fn rejects_malformed_forms() {
        assert!(Syntax::parse_program("[[]]").is_err());
        assert!(Syntax::parse_program(r#"[[["x"], "y"]]"#).is_err());
        assert!(Syntax::parse_program("[1]").is_err());
    }
}
