//! Mango emitter.
//!
//! Walks an optimized [`QueryPlan`] and writes the selector, sort, fields
//! and limit sections of a [`MangoQuery`].

use crate::document::{object, MangoQuery};
use crate::plan::{QueryPlan, SortKey};
use chrono::SecondsFormat;
use docquery_core::error::{QueryError, QueryResult};
use docquery_core::expr::{BinaryOp, Constant, Expr, QueryMethod, SortDirection, UnaryOp};
use serde_json::Value;
use tracing::debug;

/// Emits Mango documents from query plans.
pub struct MangoEmitter;

impl MangoEmitter {
    pub fn emit(plan: &QueryPlan) -> QueryResult<MangoQuery> {
        if plan.distinct {
            return Err(QueryError::unsupported(
                "operator 'Distinct' has no Mango equivalent",
            ));
        }

        let mut query = MangoQuery::match_all();
        if let Some(filter) = &plan.filter {
            query.selector = Scope::root(&filter.parameter).condition(&filter.predicate)?;
        }
        query.sort = plan.sort.iter().map(sort_entry).collect();
        query.fields = plan.fields.clone();
        query.limit = plan.limit;
        debug!(source = %plan.source, query = %query, "Emitted Mango query");
        Ok(query)
    }
}

fn sort_entry(key: &SortKey) -> Value {
    match key.direction {
        SortDirection::Ascending => Value::String(key.path.clone()),
        SortDirection::Descending => object(key.path.clone(), Value::String("desc".into())),
    }
}

/// Encode a constant as a Mango value.
///
/// Uuids become hyphenated strings and timestamps become RFC 3339 strings
/// with millisecond precision. A captured closure resolves to its single
/// captured variable.
pub fn encode_constant(value: &Constant) -> QueryResult<Value> {
    match value {
        Constant::Null => Ok(Value::Null),
        Constant::Bool(b) => Ok(Value::Bool(*b)),
        Constant::Number(n) => Ok(Value::Number(n.clone())),
        Constant::String(s) => Ok(Value::String(s.clone())),
        Constant::Uuid(u) => Ok(Value::String(u.hyphenated().to_string())),
        Constant::DateTime(d) => Ok(Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))),
        Constant::List(items) => items
            .iter()
            .map(encode_constant)
            .collect::<QueryResult<Vec<_>>>()
            .map(Value::Array),
        Constant::Captured { fields } => match fields.as_slice() {
            [field] => encode_constant(&field.value),
            _ => Err(QueryError::unsupported(format!(
                "captured closure with {} variables cannot be used as a value",
                fields.len()
            ))),
        },
    }
}

/// Lambda scope: the parameter field paths are relative to, plus the
/// enclosing parameters that may not be referenced.
struct Scope<'a> {
    parameter: &'a str,
    outer: Vec<&'a str>,
}

impl<'a> Scope<'a> {
    fn root(parameter: &'a str) -> Self {
        Self {
            parameter,
            outer: Vec::new(),
        }
    }

    fn nested(&self, parameter: &'a str) -> Self {
        let mut outer = self.outer.clone();
        outer.push(self.parameter);
        Self { parameter, outer }
    }

    /// Selector for a predicate expression.
    fn condition(&self, expr: &'a Expr) -> QueryResult<Value> {
        match expr {
            Expr::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                ..
            } => {
                let key = if *op == BinaryOp::And { "$and" } else { "$or" };
                self.combine(key, expr, *op)
            }
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.comparison(*op, left, right)
            }
            Expr::Binary { op, .. } => Err(QueryError::unsupported(format!(
                "arithmetic '{}' cannot be used as a condition",
                op.as_str()
            ))),
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => match operand.strip_convert() {
                inner @ Expr::Binary {
                    op: BinaryOp::Or, ..
                } => self.combine("$nor", inner, BinaryOp::Or),
                inner => Ok(object("$not", self.condition(inner)?)),
            },
            Expr::Unary {
                op: UnaryOp::Convert,
                operand,
            } => self.condition(operand),
            Expr::Call { method, args } => self.call(method, args),
            Expr::Member { .. } | Expr::Parameter { .. } => Err(QueryError::unsupported(format!(
                "'{}' cannot be used as a condition without a comparison",
                expr
            ))),
            Expr::Constant { .. } => Err(QueryError::unsupported(format!(
                "constant predicate '{}' cannot be translated",
                expr
            ))),
            other => Err(QueryError::unsupported(format!(
                "{} node cannot be used as a condition",
                other.node_name()
            ))),
        }
    }

    /// Flatten a left-deep run of one logical operator into a single array.
    fn combine(&self, key: &str, expr: &'a Expr, op: BinaryOp) -> QueryResult<Value> {
        let mut operands = Vec::new();
        flatten(expr, op, &mut operands);
        let conditions = operands
            .into_iter()
            .map(|operand| self.condition(operand))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(object(key, Value::Array(conditions)))
    }

    fn comparison(&self, op: BinaryOp, left: &'a Expr, right: &'a Expr) -> QueryResult<Value> {
        // constant on the left: swap operands
        let (op, left, right) = if left.as_constant().is_some() && right.as_constant().is_none() {
            (op.flipped(), right, left)
        } else {
            (op, left, right)
        };

        let value = match right.as_constant() {
            Some(constant) => encode_constant(constant)?,
            None => {
                return Err(QueryError::unsupported(format!(
                    "comparison '{} {} {}' needs a constant operand",
                    left,
                    op.as_str(),
                    right
                )))
            }
        };

        match left.strip_convert() {
            Expr::Unary {
                op: UnaryOp::Length,
                operand,
            } => {
                let path = self.require_path(operand)?;
                if op != BinaryOp::Eq {
                    return Err(QueryError::unsupported(format!(
                        "length of '{}' can only be compared with '=='",
                        operand
                    )));
                }
                Ok(field_condition(&path, object("$size", value)))
            }
            Expr::Binary {
                op: BinaryOp::Modulo,
                left: dividend,
                right: divisor,
            } => {
                let path = self.require_path(dividend)?;
                let divisor = divisor.as_constant().ok_or_else(|| {
                    QueryError::unsupported(format!("divisor '{}' must be a constant", divisor))
                })?;
                if op != BinaryOp::Eq {
                    return Err(QueryError::unsupported(format!(
                        "remainder of '{}' can only be compared with '=='",
                        dividend
                    )));
                }
                let divisor = encode_constant(divisor)?;
                if divisor.as_i64().filter(|d| *d != 0).is_none() {
                    return Err(QueryError::unsupported(format!(
                        "divisor {} must be a non-zero integer",
                        divisor
                    )));
                }
                if value.as_i64().is_none() {
                    return Err(QueryError::unsupported(format!(
                        "remainder {} must be an integer",
                        value
                    )));
                }
                let remainder = Value::Array(vec![divisor, value]);
                Ok(field_condition(&path, object("$mod", remainder)))
            }
            Expr::Binary { op: arith, .. } if !arith.is_comparison() && !arith.is_logical() => {
                Err(QueryError::unsupported(format!(
                    "arithmetic '{}' is not supported in comparisons",
                    arith.as_str()
                )))
            }
            _ => {
                let path = self.require_path(left)?;
                let condition = match op {
                    BinaryOp::Eq if path.is_empty() || value.is_object() || value.is_array() => {
                        object("$eq", value)
                    }
                    BinaryOp::Eq => return Ok(object(path, value)),
                    other => object(comparison_operator(other)?, value),
                };
                Ok(field_condition(&path, condition))
            }
        }
    }

    fn call(&self, method: &QueryMethod, args: &'a [Expr]) -> QueryResult<Value> {
        match (method, args) {
            (QueryMethod::Any | QueryMethod::All, [collection, lambda]) => {
                let path = self.require_path(collection)?;
                let (parameter, body) = lambda.as_lambda().ok_or_else(|| {
                    QueryError::unsupported(format!("'{}' expects a lambda predicate", method))
                })?;
                let inner = self.nested(parameter).condition(body)?;
                let key = if *method == QueryMethod::Any {
                    "$elemMatch"
                } else {
                    "$allMatch"
                };
                Ok(field_condition(&path, object(key, inner)))
            }
            (QueryMethod::Contains, [collection, item]) => {
                match (collection.as_constant(), item.as_constant()) {
                    (None, Some(item)) => {
                        let path = self.require_path(collection)?;
                        let all = Value::Array(vec![encode_constant(item)?]);
                        Ok(field_condition(&path, object("$all", all)))
                    }
                    (Some(list), None) => self.membership(item, list),
                    _ => Err(QueryError::unsupported(format!(
                        "'Contains' needs one field and one constant, found '{}' and '{}'",
                        collection, item
                    ))),
                }
            }
            (QueryMethod::In, [value, list]) => match list.as_constant() {
                Some(list) => self.membership(value, list),
                None => Err(QueryError::unsupported(format!(
                    "'In' needs a constant list, found '{}'",
                    list
                ))),
            },
            (QueryMethod::IsMatch, [value, pattern]) => {
                let path = self.require_path(value)?;
                match pattern.as_constant() {
                    Some(Constant::String(pattern)) => Ok(field_condition(
                        &path,
                        object("$regex", Value::String(pattern.clone())),
                    )),
                    _ => Err(QueryError::unsupported(format!(
                        "'IsMatch' needs a constant string pattern, found '{}'",
                        pattern
                    ))),
                }
            }
            _ => Err(QueryError::unsupported(format!(
                "operator '{}' cannot be used in a filter",
                method
            ))),
        }
    }

    /// `field IN list`
    fn membership(&self, field: &'a Expr, list: &Constant) -> QueryResult<Value> {
        let path = self.require_path(field)?;
        match encode_constant(list)? {
            values @ Value::Array(_) => Ok(field_condition(&path, object("$in", values))),
            _ => Err(QueryError::unsupported(format!(
                "membership test needs a list, found a {} constant",
                list.kind_name()
            ))),
        }
    }

    /// Field path of `expr` relative to this scope's parameter.
    fn require_path(&self, expr: &Expr) -> QueryResult<String> {
        let Some(path) = expr.field_path() else {
            return Err(QueryError::unsupported(format!(
                "'{}' is not a field path",
                expr
            )));
        };
        if path.parameter == self.parameter {
            Ok(path.dotted())
        } else if self.outer.contains(&path.parameter.as_str()) {
            Err(QueryError::unsupported(format!(
                "'{}' refers to outer parameter '{}' inside a nested lambda",
                expr, path.parameter
            )))
        } else {
            Err(QueryError::unsupported(format!(
                "unknown parameter '{}'",
                path.parameter
            )))
        }
    }
}

fn flatten<'e>(expr: &'e Expr, op: BinaryOp, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary {
            op: current,
            left,
            right,
        } if *current == op => {
            flatten(left, op, out);
            flatten(right, op, out);
        }
        other => out.push(other),
    }
}

/// Attach a condition to a path; the empty path is an array element itself.
fn field_condition(path: &str, condition: Value) -> Value {
    if path.is_empty() {
        condition
    } else {
        object(path, condition)
    }
}

fn comparison_operator(op: BinaryOp) -> QueryResult<&'static str> {
    match op {
        BinaryOp::Eq => Ok("$eq"),
        BinaryOp::Ne => Ok("$ne"),
        BinaryOp::Lt => Ok("$lt"),
        BinaryOp::Le => Ok("$lte"),
        BinaryOp::Gt => Ok("$gt"),
        BinaryOp::Ge => Ok("$gte"),
        other => Err(QueryError::unsupported(format!(
            "'{}' is not a comparison",
            other.as_str()
        ))),
    }
}
