//! Query optimizer.
//!
//! Rewrites a raw call chain into a [`QueryPlan`]:
//! - consecutive `Where` calls are merged into one conjunctive filter
//! - bare boolean members inside filters become `== true` / `== false`
//! - sort, cap, projection and distinct operators are checked and collected
//!
//! Every call node is checked against the [`OperatorRegistry`] first; an
//! unregistered operator fails the whole query.

use crate::plan::{Filter, QueryPlan, SortKey};
use crate::registry::{OperatorKind, OperatorRegistry};
use docquery_core::error::{QueryError, QueryResult};
use docquery_core::expr::{BinaryOp, Constant, Expr, QueryMethod, SortDirection, UnaryOp};
use std::collections::VecDeque;
use tracing::debug;

/// Operators already seen while walking the chain from the source outwards.
#[derive(Debug, Default)]
struct Stage {
    limited: bool,
    projected: bool,
    distinct: bool,
}

impl Stage {
    /// First operator seen that closes the chain to filters and sorts.
    fn barrier(&self) -> Option<&'static str> {
        if self.limited {
            Some("Take")
        } else if self.projected {
            Some("Select")
        } else if self.distinct {
            Some("Distinct")
        } else {
            None
        }
    }
}

/// Builds a [`QueryPlan`] from an expression tree.
#[derive(Debug, Default)]
pub struct QueryOptimizer {
    /// Set while normalizing a filter predicate; boolean rewriting only
    /// happens when it is on.
    inside_where: bool,
    /// `Where` lambdas in source-to-outer order, not yet merged.
    pending_filters: VecDeque<(String, Expr)>,
}

impl QueryOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimize a query tree into a plan.
    pub fn optimize(expr: &Expr) -> QueryResult<QueryPlan> {
        Self::new().build(expr)
    }

    fn build(mut self, expr: &Expr) -> QueryResult<QueryPlan> {
        let (source, calls) = unwind(expr)?;
        let mut plan = QueryPlan::new(source);
        let mut stage = Stage::default();

        for (method, args) in calls.into_iter().rev() {
            match method {
                QueryMethod::Where => {
                    if let Some(barrier) = stage.barrier() {
                        return Err(after_barrier(method, barrier));
                    }
                    let (parameter, body) = lambda_arg(method, args)?;
                    self.pending_filters
                        .push_back((parameter.to_string(), body.clone()));
                }
                QueryMethod::OrderBy
                | QueryMethod::OrderByDescending
                | QueryMethod::ThenBy
                | QueryMethod::ThenByDescending => {
                    if let Some(barrier) = stage.barrier() {
                        return Err(after_barrier(method, barrier));
                    }
                    self.add_sort_key(&mut plan, method, args)?;
                }
                QueryMethod::Take => {
                    let count = take_count(&args[1])?;
                    plan.limit = Some(plan.limit.map_or(count, |limit| limit.min(count)));
                    stage.limited = true;
                }
                QueryMethod::Select => {
                    if stage.projected {
                        return Err(QueryError::unsupported(
                            "only one 'Select' can be translated",
                        ));
                    }
                    if stage.distinct {
                        return Err(after_barrier(method, "Distinct"));
                    }
                    let (parameter, body) = lambda_arg(method, args)?;
                    let body = self.normalize(body, false)?;
                    plan.fields = projection(parameter, &body)?;
                    stage.projected = true;
                }
                QueryMethod::Distinct => {
                    if stage.limited {
                        return Err(after_barrier(method, "Take"));
                    }
                    plan.distinct = true;
                    stage.distinct = true;
                }
                other => {
                    return Err(QueryError::unsupported(format!(
                        "operator '{}' cannot be applied to a query",
                        other
                    )))
                }
            }
        }

        plan.filter = self.merge_filters()?;

        debug!(
            source = %plan.source,
            filtered = plan.filter.is_some(),
            sort_keys = plan.sort.len(),
            limit = ?plan.limit,
            "Query plan built"
        );
        Ok(plan)
    }

    fn add_sort_key(
        &self,
        plan: &mut QueryPlan,
        method: &QueryMethod,
        args: &[Expr],
    ) -> QueryResult<()> {
        let Some(direction) = method.sort_direction() else {
            return Err(QueryError::unsupported(format!(
                "operator '{}' is not a sort",
                method
            )));
        };
        if method.is_chained_sort() && plan.sort.is_empty() {
            return Err(QueryError::invalid_operation(format!(
                "'{}' requires a preceding 'OrderBy' or 'OrderByDescending'",
                method
            )));
        }
        if let Some(current) = plan.sort_direction() {
            if current != direction {
                return Err(QueryError::invalid_operation(format!(
                    "cannot mix sort directions: '{}' after {} keys",
                    method,
                    direction_label(current)
                )));
            }
        }

        let (parameter, body) = lambda_arg(method, args)?;
        let path = member_path(body, parameter).ok_or_else(|| {
            QueryError::unsupported(format!(
                "sort key must be a field of '{}', found '{}'",
                parameter, body
            ))
        })?;
        plan.sort.push(SortKey { path, direction });
        Ok(())
    }

    /// Fold pending filters with `And`, innermost first, and normalize the
    /// result.
    fn merge_filters(&mut self) -> QueryResult<Option<Filter>> {
        let Some((parameter, first)) = self.pending_filters.pop_front() else {
            return Ok(None);
        };

        let mut merged = first;
        while let Some((name, predicate)) = self.pending_filters.pop_front() {
            let predicate = if name == parameter {
                predicate
            } else {
                rebind(&predicate, &name, &parameter)?
            };
            merged = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(merged),
                right: Box::new(predicate),
            };
        }

        self.inside_where = true;
        let predicate = self.normalize(&merged, true);
        self.inside_where = false;

        Ok(Some(Filter {
            parameter,
            predicate: predicate?,
        }))
    }

    /// Check calls against the registry and, inside filters, rewrite bare
    /// boolean members. `predicate` marks a position whose value is used
    /// directly as a condition.
    fn normalize(&self, expr: &Expr, predicate: bool) -> QueryResult<Expr> {
        let rewrite = predicate && self.inside_where;
        match expr {
            Expr::Member { .. } if rewrite && expr.field_path().is_some() => {
                Ok(compare_bool(expr.clone(), true))
            }
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } if rewrite && is_bool_member(operand) => {
                Ok(compare_bool(operand.strip_convert().clone(), false))
            }
            Expr::Unary {
                op: UnaryOp::Convert,
                operand,
            } if rewrite => self.normalize(operand, true),
            Expr::Unary { op, operand } => Ok(Expr::Unary {
                op: *op,
                operand: Box::new(self.normalize(operand, predicate && *op == UnaryOp::Not)?),
            }),
            Expr::Binary { op, left, right } => {
                let operands_are_predicates = predicate && op.is_logical();
                Ok(Expr::Binary {
                    op: *op,
                    left: Box::new(self.normalize(left, operands_are_predicates)?),
                    right: Box::new(self.normalize(right, operands_are_predicates)?),
                })
            }
            Expr::Call { method, args } => self.normalize_call(method, args),
            _ => expr.try_map_children(|child| self.normalize(child, false)),
        }
    }

    fn normalize_call(&self, method: &QueryMethod, args: &[Expr]) -> QueryResult<Expr> {
        let info = OperatorRegistry::check(method, args)?;
        if info.kind == OperatorKind::Chain {
            return Err(QueryError::unsupported(format!(
                "operator '{}' cannot be nested inside a lambda",
                method
            )));
        }

        let args = match method {
            QueryMethod::Any | QueryMethod::All => {
                let (parameter, body) = lambda_arg(method, args)?;
                vec![
                    self.normalize(&args[0], false)?,
                    Expr::Lambda {
                        parameter: parameter.to_string(),
                        body: Box::new(self.normalize(body, true)?),
                    },
                ]
            }
            _ => args
                .iter()
                .map(|arg| self.normalize(arg, false))
                .collect::<QueryResult<_>>()?,
        };

        Ok(Expr::Call {
            method: method.clone(),
            args,
        })
    }
}

/// Walk the chain down to its source. Calls are returned outermost first.
fn unwind(expr: &Expr) -> QueryResult<(String, Vec<(&QueryMethod, &[Expr])>)> {
    let mut calls = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Source { collection } => return Ok((collection.clone(), calls)),
            Expr::Call { method, args } => {
                let info = OperatorRegistry::check(method, args)?;
                if info.kind != OperatorKind::Chain {
                    return Err(QueryError::unsupported(format!(
                        "operator '{}' cannot be applied to a query",
                        method
                    )));
                }
                calls.push((method, args.as_slice()));
                current = &args[0];
            }
            other => {
                return Err(QueryError::unsupported(format!(
                    "query must start from a source, found {} node",
                    other.node_name()
                )))
            }
        }
    }
}

fn after_barrier(method: &QueryMethod, barrier: &str) -> QueryError {
    QueryError::unsupported(format!(
        "'{}' after '{}' cannot be translated",
        method, barrier
    ))
}

fn direction_label(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ascending",
        SortDirection::Descending => "descending",
    }
}

fn lambda_arg<'a>(method: &QueryMethod, args: &'a [Expr]) -> QueryResult<(&'a str, &'a Expr)> {
    args.get(1)
        .and_then(Expr::as_lambda)
        .ok_or_else(|| {
            QueryError::unsupported(format!(
                "'{}' expects a lambda argument, found {} node",
                method,
                args.get(1).map_or("no", Expr::node_name)
            ))
        })
}

fn take_count(arg: &Expr) -> QueryResult<u64> {
    match arg.as_constant() {
        Some(Constant::Number(n)) => n.as_u64().ok_or_else(|| {
            QueryError::unsupported(format!("'Take' count must be a non-negative integer, found {}", n))
        }),
        _ => Err(QueryError::unsupported(format!(
            "'Take' count must be a constant, found '{}'",
            arg
        ))),
    }
}

/// Dotted path of a non-root field of `parameter`.
fn member_path(expr: &Expr, parameter: &str) -> Option<String> {
    expr.field_path()
        .filter(|path| path.parameter == parameter && !path.is_root())
        .map(|path| path.dotted())
}

fn projection(parameter: &str, body: &Expr) -> QueryResult<Option<Vec<String>>> {
    match body.strip_convert() {
        Expr::Parameter { name } if name == parameter => Ok(None),
        Expr::New { members } if members.is_empty() => Err(QueryError::unsupported(
            "projection to an empty shape cannot be translated",
        )),
        Expr::New { members } => members
            .iter()
            .map(|member| {
                member_path(&member.value, parameter).ok_or_else(|| {
                    QueryError::unsupported(format!(
                        "projected member '{}' must be a field of '{}', found '{}'",
                        member.name, parameter, member.value
                    ))
                })
            })
            .collect::<QueryResult<Vec<_>>>()
            .map(Some),
        other => member_path(other, parameter)
            .map(|path| Some(vec![path]))
            .ok_or_else(|| {
                QueryError::unsupported(format!(
                    "projection '{}' is neither a field nor a set of fields",
                    other
                ))
            }),
    }
}

fn is_bool_member(expr: &Expr) -> bool {
    matches!(expr.strip_convert(), Expr::Member { .. }) && expr.field_path().is_some()
}

fn compare_bool(member: Expr, value: bool) -> Expr {
    Expr::Binary {
        op: BinaryOp::Eq,
        left: Box::new(member),
        right: Box::new(Expr::Constant {
            value: Constant::Bool(value),
        }),
    }
}

/// Rename free references to parameter `from` into `to`.
fn rebind(expr: &Expr, from: &str, to: &str) -> QueryResult<Expr> {
    match expr {
        Expr::Parameter { name } if name == from => Ok(Expr::Parameter {
            name: to.to_string(),
        }),
        Expr::Lambda { parameter, .. } if parameter == from => Ok(expr.clone()),
        Expr::Lambda { parameter, body } if parameter == to && body.references_parameter(from) => {
            Err(QueryError::unsupported(format!(
                "cannot merge filters: lambda parameter '{}' hides the outer filter parameter",
                parameter
            )))
        }
        _ => expr.try_map_children(|child| rebind(child, from, to)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docquery_core::expr::{lit, new_object, param, Query};

    fn families() -> Query {
        Query::source("families")
    }

    #[test]
    fn test_single_where() {
        let plan = QueryOptimizer::optimize(
            &families()
                .filter("f", param("f").field("Age").gt(5))
                .into_expr(),
        )
        .unwrap();
        let filter = plan.filter.unwrap();
        assert_eq!(filter.parameter, "f");
        assert_eq!(filter.predicate, param("f").field("Age").gt(5));
    }

    #[test]
    fn test_where_merge_is_innermost_first() {
        let expr = families()
            .filter("f", param("f").field("A").equals(1))
            .filter("g", param("g").field("B").equals(2))
            .filter("h", param("h").field("C").equals(3))
            .into_expr();
        let plan = QueryOptimizer::optimize(&expr).unwrap();
        let expected = param("f")
            .field("A")
            .equals(1)
            .and(param("f").field("B").equals(2))
            .and(param("f").field("C").equals(3));
        assert_eq!(plan.filter.unwrap().predicate, expected);
    }

    #[test]
    fn test_rebind_respects_shadowing() {
        let expr = families()
            .filter("f", param("f").field("IsActive").equals(true))
            .filter(
                "g",
                param("g")
                    .field("Children")
                    .any("g", param("g").field("Grade").gt(3)),
            )
            .into_expr();
        let predicate = QueryOptimizer::optimize(&expr).unwrap().filter.unwrap().predicate;
        let expected = param("f").field("IsActive").equals(true).and(
            param("f")
                .field("Children")
                .any("g", param("g").field("Grade").gt(3)),
        );
        assert_eq!(predicate, expected);
    }

    #[test]
    fn test_rebind_capture_is_rejected() {
        let expr = families()
            .filter("f", param("f").field("A").equals(1))
            .filter(
                "g",
                param("g")
                    .field("Children")
                    .any("f", param("f").field("Grade").equals(param("g").field("Grade"))),
            )
            .into_expr();
        assert!(matches!(
            QueryOptimizer::optimize(&expr),
            Err(QueryError::Unsupported(_))
        ));
    }

    #[test]
    fn test_bool_member_rewritten() {
        let expr = families()
            .filter("f", param("f").field("IsRegistered"))
            .into_expr();
        let predicate = QueryOptimizer::optimize(&expr).unwrap().filter.unwrap().predicate;
        assert_eq!(predicate, param("f").field("IsRegistered").equals(true));
    }

    #[test]
    fn test_negated_bool_member_rewritten() {
        let expr = families()
            .filter(
                "f",
                param("f")
                    .field("IsRegistered")
                    .not()
                    .and(param("f").field("Address").field("IsPrimary")),
            )
            .into_expr();
        let predicate = QueryOptimizer::optimize(&expr).unwrap().filter.unwrap().predicate;
        let expected = param("f")
            .field("IsRegistered")
            .equals(false)
            .and(param("f").field("Address").field("IsPrimary").equals(true));
        assert_eq!(predicate, expected);
    }

    #[test]
    fn test_bool_member_in_comparison_untouched() {
        let predicate = param("f").field("IsRegistered").equals(false);
        let expr = families().filter("f", predicate.clone()).into_expr();
        let plan = QueryOptimizer::optimize(&expr).unwrap();
        assert_eq!(plan.filter.unwrap().predicate, predicate);
    }

    #[test]
    fn test_bool_member_inside_any_rewritten() {
        let expr = families()
            .filter(
                "f",
                param("f").field("Pets").any("p", param("p").field("Vaccinated")),
            )
            .into_expr();
        let predicate = QueryOptimizer::optimize(&expr).unwrap().filter.unwrap().predicate;
        let expected = param("f")
            .field("Pets")
            .any("p", param("p").field("Vaccinated").equals(true));
        assert_eq!(predicate, expected);
    }

    #[test]
    fn test_projection_not_rewritten() {
        let expr = families()
            .select("f", param("f").field("IsRegistered"))
            .into_expr();
        let plan = QueryOptimizer::optimize(&expr).unwrap();
        assert!(plan.filter.is_none());
        assert_eq!(plan.fields, Some(vec!["IsRegistered".to_string()]));
    }

    #[test]
    fn test_projection_shapes() {
        let identity = families().select("f", param("f")).into_expr();
        assert_eq!(QueryOptimizer::optimize(&identity).unwrap().fields, None);

        let multi = families()
            .select(
                "f",
                new_object([
                    ("Name", param("f").field("LastName")),
                    ("City", param("f").field("Address").field("City")),
                ]),
            )
            .into_expr();
        assert_eq!(
            QueryOptimizer::optimize(&multi).unwrap().fields,
            Some(vec!["LastName".to_string(), "Address.City".to_string()])
        );

        let computed = families()
            .select("f", param("f").field("Age").add(1))
            .into_expr();
        assert!(QueryOptimizer::optimize(&computed).is_err());
    }

    #[test]
    fn test_sort_keys_in_call_order() {
        let expr = families()
            .order_by("f", param("f").field("LastName"))
            .then_by("f", param("f").field("Address").field("State"))
            .into_expr();
        let plan = QueryOptimizer::optimize(&expr).unwrap();
        let paths: Vec<_> = plan.sort.iter().map(|k| k.path.as_str()).collect();
        assert_eq!(paths, vec!["LastName", "Address.State"]);
        assert_eq!(plan.sort_direction(), Some(SortDirection::Ascending));
    }

    #[test]
    fn test_mixed_sort_directions_rejected() {
        let expr = families()
            .order_by("f", param("f").field("LastName"))
            .then_by_descending("f", param("f").field("Age"))
            .into_expr();
        assert!(matches!(
            QueryOptimizer::optimize(&expr),
            Err(QueryError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_then_by_without_order_by() {
        let expr = families()
            .then_by("f", param("f").field("LastName"))
            .into_expr();
        assert!(matches!(
            QueryOptimizer::optimize(&expr),
            Err(QueryError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_take_keeps_minimum() {
        let expr = families().take(10).take(3).take(7).into_expr();
        assert_eq!(QueryOptimizer::optimize(&expr).unwrap().limit, Some(3));
    }

    #[test]
    fn test_take_requires_integer_constant() {
        let expr = families()
            .call("Take", vec![lit(-1)])
            .into_expr();
        assert!(QueryOptimizer::optimize(&expr).is_err());
    }

    #[test]
    fn test_where_after_take_rejected() {
        let expr = families()
            .take(5)
            .filter("f", param("f").field("Age").gt(5))
            .into_expr();
        let err = QueryOptimizer::optimize(&expr).unwrap_err();
        assert!(err.to_string().contains("Take"));
    }

    #[test]
    fn test_nested_chain_operator_rejected() {
        let nested = families().take(1).into_expr();
        let expr = families()
            .filter("f", param("f").field("Age").gt(5).and(nested))
            .into_expr();
        assert!(QueryOptimizer::optimize(&expr).is_err());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let expr = families().call("Skip", vec![lit(2)]).into_expr();
        let err = QueryOptimizer::optimize(&expr).unwrap_err();
        assert!(err.to_string().contains("Skip"));
    }

    #[test]
    fn test_query_without_source_rejected() {
        let expr = param("f")
            .call("Where", vec![lambda_of("f", param("f").field("A"))]);
        assert!(QueryOptimizer::optimize(&expr).is_err());
    }

    fn lambda_of(parameter: &str, body: Expr) -> Expr {
        docquery_core::expr::lambda(parameter, body)
    }

    #[test]
    fn test_distinct_after_take_rejected() {
        let ok = families().distinct().take(2).into_expr();
        assert!(QueryOptimizer::optimize(&ok).unwrap().distinct);

        let bad = families().take(2).distinct().into_expr();
        assert!(QueryOptimizer::optimize(&bad).is_err());
    }
}
