//! Direct evaluation of query plans over in-memory documents.
//!
//! Comparison semantics follow Mango:
//! - values of different JSON types order as
//!   null < bool < number < string < array < object
//! - a missing field fails every condition on it, including `!=`
//! - negation inverts the whole sub-condition, so a negated comparison on
//!   a missing field matches
//!
//! Plans are applied as filter, sort, project, distinct, limit.

use docquery_core::error::QueryError;
use docquery_core::expr::{BinaryOp, Expr, QueryMethod, SortDirection, UnaryOp};
use docquery_core::storage::{Document, Result, StoreError};
use docquery_mango::{encode_constant, QueryPlan, SortKey};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Lambda parameters in scope, innermost last.
type Bindings<'a> = Vec<(&'a str, &'a Value)>;

/// Evaluates plans; caches compiled regex patterns across documents.
#[derive(Debug, Default)]
pub struct Interpreter {
    patterns: HashMap<String, Regex>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a plan over documents, returning the result set in order.
    pub fn evaluate<'d>(
        &mut self,
        plan: &QueryPlan,
        documents: impl IntoIterator<Item = &'d Document>,
    ) -> Result<Vec<Document>> {
        let mut results = Vec::new();
        for doc in documents {
            let keep = match &plan.filter {
                Some(filter) => {
                    let mut bindings = vec![(filter.parameter.as_str(), &doc.payload)];
                    self.matches(&filter.predicate, &mut bindings)?
                }
                None => true,
            };
            if keep {
                results.push(doc.clone());
            }
        }

        if !plan.sort.is_empty() {
            results.sort_by(|a, b| compare_by_keys(a, b, &plan.sort));
        }

        if let Some(fields) = &plan.fields {
            results = results
                .into_iter()
                .map(|doc| project(doc, fields))
                .collect();
        }

        if plan.distinct {
            let mut unique: Vec<Document> = Vec::with_capacity(results.len());
            for doc in results {
                if !unique.iter().any(|seen| seen.payload == doc.payload) {
                    unique.push(doc);
                }
            }
            results = unique;
        }

        if let Some(limit) = plan.limit {
            results.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(results)
    }

    /// True if the predicate holds under the given bindings.
    fn matches<'a>(&mut self, expr: &'a Expr, bindings: &mut Bindings<'a>) -> Result<bool> {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Ok(self.matches(left, bindings)? && self.matches(right, bindings)?),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => Ok(self.matches(left, bindings)? || self.matches(right, bindings)?),
            Expr::Binary { op, left, right } if op.is_comparison() => {
                let (Some(left), Some(right)) =
                    (operand(left, bindings)?, operand(right, bindings)?)
                else {
                    return Ok(false);
                };
                let ordering = compare_json(&left, &right);
                Ok(match op {
                    BinaryOp::Eq => ordering == Ordering::Equal,
                    BinaryOp::Ne => ordering != Ordering::Equal,
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(!self.matches(operand, bindings)?),
            Expr::Unary {
                op: UnaryOp::Convert,
                operand,
            } => self.matches(operand, bindings),
            Expr::Call { method, args } => self.call(method, args, bindings),
            other => Err(unsupported(format!(
                "'{}' cannot be evaluated as a condition",
                other
            ))),
        }
    }

    fn call<'a>(
        &mut self,
        method: &QueryMethod,
        args: &'a [Expr],
        bindings: &mut Bindings<'a>,
    ) -> Result<bool> {
        match (method, args) {
            (QueryMethod::Any | QueryMethod::All, [collection, lambda]) => {
                let Some((parameter, body)) = lambda.as_lambda() else {
                    return Err(unsupported(format!("'{}' expects a lambda predicate", method)));
                };
                let Some(Value::Array(items)) = lookup(collection, bindings)? else {
                    return Ok(false);
                };
                // Mango $allMatch never matches an empty array
                if items.is_empty() {
                    return Ok(false);
                }
                let want_all = *method == QueryMethod::All;
                for item in items {
                    bindings.push((parameter, item));
                    let hit = self.matches(body, bindings);
                    bindings.pop();
                    if hit? != want_all {
                        return Ok(!want_all);
                    }
                }
                Ok(want_all)
            }
            (QueryMethod::Contains, [collection, item]) => match collection.as_constant() {
                Some(list) => member_of(operand(item, bindings)?, &encode_constant(list)?),
                None => {
                    let Some(Value::Array(items)) = lookup(collection, bindings)? else {
                        return Ok(false);
                    };
                    let Some(needle) = operand(item, bindings)? else {
                        return Ok(false);
                    };
                    Ok(items
                        .iter()
                        .any(|v| compare_json(v, &needle) == Ordering::Equal))
                }
            },
            (QueryMethod::In, [value, list]) => {
                let list = match list.as_constant() {
                    Some(list) => encode_constant(list)?,
                    None => return Err(unsupported("'In' needs a constant list")),
                };
                member_of(operand(value, bindings)?, &list)
            }
            (QueryMethod::IsMatch, [value, pattern]) => {
                let Some(Value::String(pattern)) =
                    pattern.as_constant().map(encode_constant).transpose()?
                else {
                    return Err(unsupported("'IsMatch' needs a constant string pattern"));
                };
                let Some(Value::String(text)) = lookup(value, bindings)? else {
                    return Ok(false);
                };
                Ok(self.regex(&pattern)?.is_match(text))
            }
            _ => Err(unsupported(format!(
                "operator '{}' cannot be evaluated",
                method
            ))),
        }
    }

    fn regex(&mut self, pattern: &str) -> Result<&Regex> {
        if !self.patterns.contains_key(pattern) {
            let compiled = Regex::new(pattern).map_err(|e| {
                StoreError::BadRequest(format!("invalid pattern '{}': {}", pattern, e))
            })?;
            self.patterns.insert(pattern.to_string(), compiled);
        }
        self.patterns
            .get(pattern)
            .ok_or_else(|| StoreError::Backend(format!("pattern '{}' not cached", pattern)))
    }
}

fn unsupported(message: impl Into<String>) -> StoreError {
    StoreError::Query(QueryError::unsupported(message))
}

/// Value of a field path, or `None` when the field is missing.
fn lookup<'a>(expr: &Expr, bindings: &Bindings<'a>) -> Result<Option<&'a Value>> {
    let Some(path) = expr.field_path() else {
        return Err(unsupported(format!("'{}' is not a field path", expr)));
    };
    let Some((_, root)) = bindings
        .iter()
        .rev()
        .find(|(name, _)| *name == path.parameter)
    else {
        return Err(unsupported(format!("unknown parameter '{}'", path.parameter)));
    };
    Ok(path
        .segments
        .iter()
        .try_fold(*root, |value, segment| value.get(segment.as_str())))
}

/// Value of a comparison operand, or `None` when it refers to a missing
/// field.
fn operand(expr: &Expr, bindings: &Bindings<'_>) -> Result<Option<Value>> {
    if let Some(constant) = expr.as_constant() {
        return Ok(Some(encode_constant(constant)?));
    }
    match expr.strip_convert() {
        Expr::Unary {
            op: UnaryOp::Length,
            operand,
        } => Ok(match lookup(operand, bindings)? {
            Some(Value::Array(items)) => Some(Value::from(items.len())),
            _ => None,
        }),
        Expr::Binary {
            op: BinaryOp::Modulo,
            left,
            right,
        } => {
            let divisor = right
                .as_constant()
                .map(encode_constant)
                .transpose()?
                .and_then(|v| v.as_i64());
            let Some(divisor) = divisor.filter(|d| *d != 0) else {
                return Err(StoreError::BadRequest(format!(
                    "divisor '{}' must be a non-zero integer",
                    right
                )));
            };
            // wrapping: i64::MIN % -1 is 0 rather than an overflow
            Ok(lookup(left, bindings)?
                .and_then(Value::as_i64)
                .map(|n| Value::from(n.wrapping_rem(divisor))))
        }
        other => Ok(lookup(other, bindings)?.cloned()),
    }
}

fn member_of(value: Option<Value>, list: &Value) -> Result<bool> {
    let Value::Array(items) = list else {
        return Err(unsupported("membership test needs a list"));
    };
    Ok(value.is_some_and(|v| {
        items
            .iter()
            .any(|item| compare_json(item, &v) == Ordering::Equal)
    }))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_json(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| compare_json(vx, vy)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Missing sort fields order before every present value.
fn compare_by_keys(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match (a.get(&key.path), b.get(&key.path)) {
            (Some(x), Some(y)) => compare_json(x, y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering.is_ne() {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Keep only the listed paths, rebuilding nested objects for dotted paths.
fn project(doc: Document, fields: &[String]) -> Document {
    let mut projected = Map::new();
    for path in fields {
        if let Some(value) = doc.get(path) {
            insert_path(&mut projected, path, value.clone());
        }
    }
    Document {
        payload: Value::Object(projected),
        ..doc
    }
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docquery_core::expr::{param, Query};
    use docquery_mango::QueryOptimizer;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        vec![
            Document::new(
                "AndersenFamily",
                "e1",
                Some("WA".to_string()),
                json!({
                    "LastName": "Andersen",
                    "IsRegistered": true,
                    "Address": {"State": "WA", "City": "Seattle"},
                    "Children": [{"FirstName": "Henriette", "Grade": 5}],
                    "Tags": ["blue"]
                }),
            ),
            Document::new(
                "WakefieldFamily",
                "e2",
                Some("NY".to_string()),
                json!({
                    "LastName": "Wakefield",
                    "IsRegistered": false,
                    "Address": {"State": "NY", "City": "Manhattan"},
                    "Children": [
                        {"FirstName": "Jesse", "Grade": 8},
                        {"FirstName": "Lisa", "Grade": 1}
                    ]
                }),
            ),
        ]
    }

    fn run(query: Query) -> Vec<Document> {
        let plan = QueryOptimizer::optimize(&query.into_expr()).unwrap();
        Interpreter::new().evaluate(&plan, &docs()).unwrap()
    }

    fn ids(results: &[Document]) -> Vec<&str> {
        results.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_filter_bool_member() {
        let results = run(Query::source("families").filter("f", param("f").field("IsRegistered")));
        assert_eq!(ids(&results), vec!["AndersenFamily"]);
    }

    #[test]
    fn test_missing_field_fails_not_equal() {
        let results = run(Query::source("families")
            .filter("f", param("f").field("Tags").contains("red").not()));
        // negation of a failing condition matches both
        assert_eq!(results.len(), 2);

        let results = run(Query::source("families")
            .filter("f", param("f").field("Nickname").not_equals("x")));
        assert!(results.is_empty());
    }

    #[test]
    fn test_any_on_children() {
        let results = run(Query::source("families").filter(
            "f",
            param("f")
                .field("Children")
                .any("c", param("c").field("Grade").gt(6)),
        ));
        assert_eq!(ids(&results), vec!["WakefieldFamily"]);

        let results = run(Query::source("families").filter(
            "f",
            param("f")
                .field("Children")
                .all("c", param("c").field("Grade").ge(5)),
        ));
        assert_eq!(ids(&results), vec!["AndersenFamily"]);
    }

    #[test]
    fn test_sort_descending_and_take() {
        let results = run(Query::source("families")
            .order_by_descending("f", param("f").field("LastName"))
            .take(1));
        assert_eq!(ids(&results), vec!["WakefieldFamily"]);
    }

    #[test]
    fn test_projection_nested_paths() {
        let results = run(Query::source("families")
            .filter("f", param("f").field("LastName").equals("Andersen"))
            .select("f", param("f").field("Address").field("City")));
        assert_eq!(results[0].payload, json!({"Address": {"City": "Seattle"}}));
        assert_eq!(results[0].id, "AndersenFamily");
    }

    #[test]
    fn test_distinct_after_projection() {
        let mut documents = docs();
        documents.push(Document::new(
            "AndersenCousins",
            "e3",
            None,
            json!({"LastName": "Andersen"}),
        ));
        let plan = QueryOptimizer::optimize(
            &Query::source("families")
                .select("f", param("f").field("LastName"))
                .distinct()
                .into_expr(),
        )
        .unwrap();
        let results = Interpreter::new().evaluate(&plan, &documents).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_regex_and_membership() {
        let results = run(Query::source("families")
            .filter("f", param("f").field("LastName").is_match("^Wake")));
        assert_eq!(ids(&results), vec!["WakefieldFamily"]);

        let results = run(Query::source("families").filter(
            "f",
            param("f")
                .field("Address")
                .field("State")
                .is_in(vec!["WA", "CA"]),
        ));
        assert_eq!(ids(&results), vec!["AndersenFamily"]);
    }

    #[test]
    fn test_size_and_mod() {
        let results = run(Query::source("families")
            .filter("f", param("f").field("Children").length().equals(2)));
        assert_eq!(ids(&results), vec!["WakefieldFamily"]);

        let results = run(Query::source("families").filter(
            "f",
            param("f")
                .field("Children")
                .any("c", param("c").field("Grade").modulo(2).equals(1)),
        ));
        assert_eq!(ids(&results), vec!["AndersenFamily", "WakefieldFamily"]);
    }

    #[test]
    fn test_mod_at_integer_bounds() {
        let documents = vec![Document::new("min", "e1", None, json!({"N": i64::MIN}))];
        let plan = QueryOptimizer::optimize(
            &Query::source("numbers")
                .filter("f", param("f").field("N").modulo(-1).equals(0))
                .into_expr(),
        )
        .unwrap();
        let results = Interpreter::new().evaluate(&plan, &documents).unwrap();
        assert_eq!(ids(&results), vec!["min"]);
    }

    #[test]
    fn test_json_type_order() {
        assert_eq!(compare_json(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_json(&json!(true), &json!(0)), Ordering::Less);
        assert_eq!(compare_json(&json!(10), &json!("1")), Ordering::Less);
        assert_eq!(compare_json(&json!("z"), &json!([])), Ordering::Less);
        assert_eq!(compare_json(&json!([1, 2]), &json!({})), Ordering::Less);
        assert_eq!(compare_json(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(compare_json(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
    }
}
