//! Query expression tree.
//!
//! A query is a chain of method calls rooted at an [`Expr::Source`]:
//!
//! ```text
//! Take(OrderBy(Where(Source("families"), f => f.LastName == "Andersen"), f => f.Age), 10)
//! ```
//!
//! The tree is a closed sum type. Anything a caller can build is one of the
//! variants below; translators decide which shapes they accept.

mod builder;
mod method;

pub use builder::{lambda, lit, new_object, param, IntoExpr, Query};
pub use method::{QueryMethod, SortDirection};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// Root of a query chain: the collection being queried.
    Source { collection: String },
    /// Reference to a lambda parameter.
    Parameter { name: String },
    /// Field access on another expression.
    Member { target: Box<Expr>, name: String },
    /// Literal or captured value.
    Constant { value: Constant },
    /// Comparison, logical combination or arithmetic.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Negation, cast or length.
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Method call. Chain operators take their source as the first argument.
    Call { method: QueryMethod, args: Vec<Expr> },
    /// Single-parameter lambda.
    Lambda { parameter: String, body: Box<Expr> },
    /// Multi-field result shape, e.g. `new { f.Name, f.Age }`.
    New { members: Vec<NewMember> },
    /// Array index access, e.g. `f.Children[0]`.
    Index { target: Box<Expr>, index: Box<Expr> },
}

/// One member of a [`Expr::New`] result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub value: Expr,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Modulo,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// True for the six comparison operators.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// True for `And` / `Or`.
    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// The operator that gives the same result with the operands swapped.
    pub fn flipped(&self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => *other,
        }
    }

    /// Get operator as string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Modulo => "%",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Type conversion; transparent to translation.
    Convert,
    /// Collection length.
    Length,
    /// Arithmetic negation.
    Negate,
}

/// Constant value carried by an [`Expr::Constant`] node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constant {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    List(Vec<Constant>),
    /// Closure object capturing outer variables.
    Captured { fields: Vec<CapturedField> },
}

/// A named field of a [`Constant::Captured`] closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedField {
    pub name: String,
    pub value: Constant,
}

impl Constant {
    /// Closure object with the given captured variables.
    pub fn captured<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Constant)>,
        S: Into<String>,
    {
        Self::Captured {
            fields: fields
                .into_iter()
                .map(|(name, value)| CapturedField {
                    name: name.into(),
                    value,
                })
                .collect(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Uuid(_) => "uuid",
            Self::DateTime(_) => "date_time",
            Self::List(_) => "list",
            Self::Captured { .. } => "captured",
        }
    }
}

/// Dotted field path relative to a lambda parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub parameter: String,
    pub segments: Vec<String>,
}

impl FieldPath {
    /// True when the path is the parameter itself.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl Expr {
    /// Short node tag used in error messages.
    pub fn node_name(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::Parameter { .. } => "parameter",
            Self::Member { .. } => "member",
            Self::Constant { .. } => "constant",
            Self::Binary { .. } => "binary",
            Self::Unary { .. } => "unary",
            Self::Call { .. } => "call",
            Self::Lambda { .. } => "lambda",
            Self::New { .. } => "new",
            Self::Index { .. } => "index",
        }
    }

    /// Strip any `Convert` wrappers.
    pub fn strip_convert(&self) -> &Expr {
        let mut current = self;
        while let Self::Unary {
            op: UnaryOp::Convert,
            operand,
        } = current
        {
            current = operand;
        }
        current
    }

    /// Resolve a member chain ending at a parameter into a field path.
    ///
    /// Returns `None` when the chain ends anywhere else (a constant, a call,
    /// an index access).
    pub fn field_path(&self) -> Option<FieldPath> {
        let mut segments = Vec::new();
        let mut current = self.strip_convert();
        loop {
            match current {
                Self::Member { target, name } => {
                    segments.push(name.clone());
                    current = target.strip_convert();
                }
                Self::Parameter { name } => {
                    segments.reverse();
                    return Some(FieldPath {
                        parameter: name.clone(),
                        segments,
                    });
                }
                _ => return None,
            }
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self.strip_convert() {
            Self::Constant { value } => Some(value),
            _ => None,
        }
    }

    /// Split a lambda into its parameter and body.
    pub fn as_lambda(&self) -> Option<(&str, &Expr)> {
        match self {
            Self::Lambda { parameter, body } => Some((parameter, body)),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<(&QueryMethod, &[Expr])> {
        match self {
            Self::Call { method, args } => Some((method, args)),
            _ => None,
        }
    }

    /// Direct child nodes, left to right.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Source { .. } | Self::Parameter { .. } | Self::Constant { .. } => Vec::new(),
            Self::Member { target, .. } => vec![target.as_ref()],
            Self::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::Unary { operand, .. } => vec![operand.as_ref()],
            Self::Call { args, .. } => args.iter().collect(),
            Self::Lambda { body, .. } => vec![body.as_ref()],
            Self::New { members } => members.iter().map(|m| &m.value).collect(),
            Self::Index { target, index } => vec![target.as_ref(), index.as_ref()],
        }
    }

    /// Rebuild this node with every direct child replaced by `f(child)`.
    pub fn try_map_children<E>(
        &self,
        mut f: impl FnMut(&Expr) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        Ok(match self {
            Self::Source { .. } | Self::Parameter { .. } | Self::Constant { .. } => self.clone(),
            Self::Member { target, name } => Self::Member {
                target: Box::new(f(target)?),
                name: name.clone(),
            },
            Self::Binary { op, left, right } => Self::Binary {
                op: *op,
                left: Box::new(f(left)?),
                right: Box::new(f(right)?),
            },
            Self::Unary { op, operand } => Self::Unary {
                op: *op,
                operand: Box::new(f(operand)?),
            },
            Self::Call { method, args } => Self::Call {
                method: method.clone(),
                args: args.iter().map(&mut f).collect::<Result<_, E>>()?,
            },
            Self::Lambda { parameter, body } => Self::Lambda {
                parameter: parameter.clone(),
                body: Box::new(f(body)?),
            },
            Self::New { members } => Self::New {
                members: members
                    .iter()
                    .map(|m| {
                        Ok(NewMember {
                            name: m.name.clone(),
                            value: f(&m.value)?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
            },
            Self::Index { target, index } => Self::Index {
                target: Box::new(f(target)?),
                index: Box::new(f(index)?),
            },
        })
    }

    /// True if a parameter with this name is referenced anywhere below,
    /// ignoring lambdas that shadow it.
    pub fn references_parameter(&self, name: &str) -> bool {
        match self {
            Self::Parameter { name: n } => n == name,
            Self::Lambda { parameter, .. } if parameter == name => false,
            _ => self
                .children()
                .into_iter()
                .any(|child| child.references_parameter(name)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { collection } => write!(f, "{}", collection),
            Self::Parameter { name } => write!(f, "{}", name),
            Self::Member { target, name } => write!(f, "{}.{}", target, name),
            Self::Constant { value } => match value {
                Constant::Null => write!(f, "null"),
                Constant::Bool(b) => write!(f, "{}", b),
                Constant::Number(n) => write!(f, "{}", n),
                Constant::String(s) => write!(f, "{:?}", s),
                Constant::Uuid(u) => write!(f, "{}", u),
                Constant::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
                Constant::List(items) => write!(f, "[{} items]", items.len()),
                Constant::Captured { fields } => write!(f, "<closure {} fields>", fields.len()),
            },
            Self::Binary { op, left, right } => write!(f, "({} {} {})", left, op.as_str(), right),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Convert => write!(f, "{}", operand),
                UnaryOp::Length => write!(f, "{}.Length", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
            },
            Self::Call { method, args } => {
                write!(f, "{}(", method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Self::Lambda { parameter, body } => write!(f, "{} => {}", parameter, body),
            Self::New { members } => {
                write!(f, "new {{ ")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", m.name, m.value)?;
                }
                write!(f, " }}")
            }
            Self::Index { target, index } => write!(f, "{}[{}]", target, index),
        }
    }
}
