//! Compiled expression tree handed to the execution side.
//!
//! The tree is produced by the client's expression compiler and is immutable
//! once built. Structurally identical source text always yields equal trees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A single step of a document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PathSegment {
    /// `.name`
    Member(String),
    /// `.*`
    MemberWildcard,
    /// `[n]`
    Index(u32),
    /// `[*]`
    IndexWildcard,
    /// `**`
    DoubleWildcard,
}

/// Path into a document, rooted at `$`. An empty path is the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DocumentPath {
    pub segments: Vec<PathSegment>,
}

impl DocumentPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// A single-member path such as `pages`.
    pub fn member(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Member(name.into())],
        }
    }

    /// The leading member name, used as the default projection alias.
    pub fn first_member(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Member(name)) => Some(name),
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when every segment addresses exactly one location.
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, PathSegment::Member(_) | PathSegment::Index(_)))
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.segments {
            match segment {
                PathSegment::Member(name) if is_plain_identifier(name) => write!(f, ".{name}")?,
                PathSegment::Member(name) => write!(f, ".\"{}\"", name.replace('"', "\\\""))?,
                PathSegment::MemberWildcard => f.write_str(".*")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
                PathSegment::IndexWildcard => f.write_str("[*]")?,
                PathSegment::DoubleWildcard => f.write_str("**")?,
            }
        }
        Ok(())
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,

    // Comparison
    Eq,    // =, ==
    NotEq, // !=, <>
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div, // /, div
    Mod,
}

impl BinaryOp {
    /// Get the precedence of this operator (higher = binds tighter)
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 4,
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr => 6,
            BinaryOp::Add | BinaryOp::Sub => 7,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 8,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,    // not, !
    Neg,    // -
    BitNot, // ~
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::BitNot => "~",
        }
    }
}

/// Which syntax supplied the candidate list of an `IN` predicate.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListForm {
    /// `x IN (a, b, c)`: arbitrary sub-expressions
    Paren,
    /// `x IN [1, 2, 3]`: literal elements only
    Bracket,
    /// `x IN doc.field`: containment in the operand's value
    Container,
}

/// Possibly schema-qualified function name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionName {
    pub schema: Option<String>,
    pub name: String,
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// Scalar literal
    Literal { value: Value },
    /// Document field reference
    Field { path: DocumentPath },
    /// Named bind placeholder, `position` is the order of first appearance
    Placeholder { name: String, position: u32 },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call { name: FunctionName, args: Vec<Expr> },
    /// `*` as a call argument, as in `count(*)`
    Star,
    /// `target [NOT] IN list`; a `Container` list holds a single operand
    In {
        target: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
        form: ListForm,
    },
    /// `left [NOT] OVERLAPS right`
    Overlaps {
        left: Box<Expr>,
        right: Box<Expr>,
        negated: bool,
    },
    Like {
        target: Box<Expr>,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
        negated: bool,
    },
    Between {
        target: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// `target IS [NOT] value`
    Is {
        target: Box<Expr>,
        value: Box<Expr>,
        negated: bool,
    },
    Regexp {
        target: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    /// JSON array literal `[a, b]`
    Array { items: Vec<Expr> },
    /// JSON object literal `{"k": v}`
    Object { fields: Vec<(String, Expr)> },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn field(path: DocumentPath) -> Self {
        Expr::Field { path }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Whether this node may appear inside a bracketed `IN`/`OVERLAPS` list.
    ///
    /// Scalars, placeholders, nested literal arrays and objects whose values
    /// are all literals qualify.
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Literal { .. } | Expr::Placeholder { .. } => true,
            Expr::Array { items } => items.iter().all(Expr::is_literal),
            Expr::Object { fields } => fields.iter().all(|(_, v)| v.is_literal()),
            _ => false,
        }
    }

    /// Visit every node depth-first, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Literal { .. } | Expr::Field { .. } | Expr::Placeholder { .. } | Expr::Star => {}
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { left, right, .. } | Expr::Overlaps { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::In { target, list, .. } => {
                target.walk(f);
                list.iter().for_each(|e| e.walk(f));
            }
            Expr::Like {
                target,
                pattern,
                escape,
                ..
            } => {
                target.walk(f);
                pattern.walk(f);
                if let Some(escape) = escape {
                    escape.walk(f);
                }
            }
            Expr::Between {
                target, low, high, ..
            } => {
                target.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::Is { target, value, .. } => {
                target.walk(f);
                value.walk(f);
            }
            Expr::Regexp {
                target, pattern, ..
            } => {
                target.walk(f);
                pattern.walk(f);
            }
            Expr::Array { items } => items.iter().for_each(|e| e.walk(f)),
            Expr::Object { fields } => fields.iter().for_each(|(_, v)| v.walk(f)),
        }
    }

    /// Direct sub-expressions, left to right.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal { .. } | Expr::Field { .. } | Expr::Placeholder { .. } | Expr::Star => {
                Vec::new()
            }
            Expr::Unary { operand, .. } => vec![&**operand],
            Expr::Binary { left, right, .. } | Expr::Overlaps { left, right, .. } => {
                vec![&**left, &**right]
            }
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::In { target, list, .. } => std::iter::once(&**target).chain(list).collect(),
            Expr::Like {
                target,
                pattern,
                escape,
                ..
            } => {
                let mut children = vec![&**target, &**pattern];
                children.extend(escape.as_deref());
                children
            }
            Expr::Between {
                target, low, high, ..
            } => vec![&**target, &**low, &**high],
            Expr::Is { target, value, .. } => vec![&**target, &**value],
            Expr::Regexp {
                target, pattern, ..
            } => vec![&**target, &**pattern],
            Expr::Array { items } => items.iter().collect(),
            Expr::Object { fields } => fields.iter().map(|(_, v)| v).collect(),
        }
    }

    /// Rebuild the tree bottom-up, letting `f` replace any node.
    pub fn map(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let mapped = match self {
            leaf @ (Expr::Literal { .. }
            | Expr::Field { .. }
            | Expr::Placeholder { .. }
            | Expr::Star) => leaf,
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: boxed(operand, f),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: boxed(left, f),
                right: boxed(right, f),
            },
            Expr::Call { name, args } => Expr::Call {
                name,
                args: args.into_iter().map(|a| a.map(f)).collect(),
            },
            Expr::In {
                target,
                list,
                negated,
                form,
            } => Expr::In {
                target: boxed(target, f),
                list: list.into_iter().map(|e| e.map(f)).collect(),
                negated,
                form,
            },
            Expr::Overlaps {
                left,
                right,
                negated,
            } => Expr::Overlaps {
                left: boxed(left, f),
                right: boxed(right, f),
                negated,
            },
            Expr::Like {
                target,
                pattern,
                escape,
                negated,
            } => Expr::Like {
                target: boxed(target, f),
                pattern: boxed(pattern, f),
                escape: match escape {
                    Some(escape) => Some(boxed(escape, f)),
                    None => None,
                },
                negated,
            },
            Expr::Between {
                target,
                low,
                high,
                negated,
            } => Expr::Between {
                target: boxed(target, f),
                low: boxed(low, f),
                high: boxed(high, f),
                negated,
            },
            Expr::Is {
                target,
                value,
                negated,
            } => Expr::Is {
                target: boxed(target, f),
                value: boxed(value, f),
                negated,
            },
            Expr::Regexp {
                target,
                pattern,
                negated,
            } => Expr::Regexp {
                target: boxed(target, f),
                pattern: boxed(pattern, f),
                negated,
            },
            Expr::Array { items } => Expr::Array {
                items: items.into_iter().map(|e| e.map(f)).collect(),
            },
            Expr::Object { fields } => Expr::Object {
                fields: fields.into_iter().map(|(k, v)| (k, v.map(f))).collect(),
            },
        };
        f(mapped)
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholder_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Placeholder { name, .. } = e
                && !names.contains(&name.as_str())
            {
                names.push(name);
            }
        });
        names
    }

    /// Whether the tree calls one of the aggregate functions.
    pub fn has_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expr::Call { name, .. } = e
                && is_aggregate(&name.name)
            {
                found = true;
            }
        });
        found
    }
}

fn boxed(expr: Box<Expr>, f: &mut dyn FnMut(Expr) -> Expr) -> Box<Expr> {
    Box::new(expr.map(f))
}

/// Aggregate function names understood by the execution side.
pub fn is_aggregate(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "count" | "sum" | "min" | "max" | "avg"
    )
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn not_prefix(negated: bool) -> &'static str {
    if negated { "NOT " } else { "" }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => write!(f, "{value}"),
            Expr::Field { path } => write!(f, "{path}"),
            Expr::Placeholder { name, .. } => write!(f, ":{name}"),
            Expr::Unary { op, operand } => write!(f, "{}{operand}", op.symbol()),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Star => f.write_str("*"),
            Expr::In {
                target,
                list,
                negated,
                form,
            } => {
                write!(f, "({target} {}IN ", not_prefix(*negated))?;
                match form {
                    ListForm::Paren => {
                        f.write_str("(")?;
                        write_list(f, list)?;
                        f.write_str("))")
                    }
                    ListForm::Bracket => {
                        f.write_str("[")?;
                        write_list(f, list)?;
                        f.write_str("])")
                    }
                    ListForm::Container => {
                        write_list(f, list)?;
                        f.write_str(")")
                    }
                }
            }
            Expr::Overlaps {
                left,
                right,
                negated,
            } => write!(f, "({left} {}OVERLAPS {right})", not_prefix(*negated)),
            Expr::Like {
                target,
                pattern,
                escape,
                negated,
            } => {
                write!(f, "({target} {}LIKE {pattern}", not_prefix(*negated))?;
                if let Some(escape) = escape {
                    write!(f, " ESCAPE {escape}")?;
                }
                f.write_str(")")
            }
            Expr::Between {
                target,
                low,
                high,
                negated,
            } => write!(
                f,
                "({target} {}BETWEEN {low} AND {high})",
                not_prefix(*negated)
            ),
            Expr::Is {
                target,
                value,
                negated,
            } => write!(f, "({target} IS {}{value})", not_prefix(*negated)),
            Expr::Regexp {
                target,
                pattern,
                negated,
            } => write!(f, "({target} {}REGEXP {pattern})", not_prefix(*negated)),
            Expr::Array { items } => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Object { fields } => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {value}", serde_json::Value::String(key.clone()))?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_display_quotes_non_identifiers() {
        let path = DocumentPath::new(vec![
            PathSegment::Member("a".into()),
            PathSegment::IndexWildcard,
            PathSegment::Member("two words".into()),
            PathSegment::Index(3),
        ]);
        assert_eq!(path.to_string(), r#"$.a[*]."two words"[3]"#);
        assert!(!path.is_exact());
        assert_eq!(path.first_member(), Some("a"));
    }

    #[test]
    fn literal_check_recurses_into_containers() {
        let ok = Expr::Array {
            items: vec![
                Expr::literal(1),
                Expr::Object {
                    fields: vec![("k".into(), Expr::literal("v"))],
                },
            ],
        };
        assert!(ok.is_literal());

        let bad = Expr::Array {
            items: vec![Expr::binary(
                BinaryOp::Add,
                Expr::literal(1),
                Expr::literal(2),
            )],
        };
        assert!(!bad.is_literal());
    }

    #[test]
    fn map_replaces_placeholders() {
        let expr = Expr::binary(
            BinaryOp::Eq,
            Expr::field(DocumentPath::member("pages")),
            Expr::Placeholder {
                name: "pages".into(),
                position: 0,
            },
        );
        let bound = expr.map(&mut |e| match e {
            Expr::Placeholder { .. } => Expr::literal(30),
            other => other,
        });
        assert_eq!(bound.to_string(), "($.pages == 30)");
        assert!(bound.placeholder_names().is_empty());
    }
}
