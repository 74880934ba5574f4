use crate::expressions::{MultipleResults, TagsValuePair, ValueExpr};
use crate::interpreter::{execute, Context, Expr};
use crate::query::{self, Query};
use std::sync::Arc;

/// Facade for evaluating expression programs against measurement sets and
/// for extracting the filtering query of a program. All failures are
/// logged and produce an empty result or `:false` rather than an error.
#[derive(Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Evaluator
    }

    /// Evaluate `expression` against the input, concatenating the outputs
    /// of every expression left on the stack.
    pub fn eval(&self, expression: &str, input: &[TagsValuePair]) -> Vec<TagsValuePair> {
        if input.is_empty() {
            return Vec::new();
        }

        let mut context = Context::new();
        if let Err(err) = execute(&mut context, expression) {
            tracing::error!(expression, %err, "failed to evaluate expression");
            return Vec::new();
        }

        let mut results = Vec::new();
        while !context.is_empty() {
            let top = context.pop().expect("stack is non-empty");
            match to_multiple_results(top) {
                Some(expr) => results.extend(expr.apply(input)),
                None => {
                    tracing::error!(
                        expression,
                        "expecting a group-by or value expression on the stack"
                    );
                }
            }
        }
        results
    }

    /// The query describing which tag sets `expression` can consume.
    /// Programs that do not leave exactly one usable expression yield
    /// `:false`.
    pub fn query(&self, expression: &str) -> Arc<Query> {
        let mut context = Context::new();
        if let Err(err) = execute(&mut context, expression) {
            tracing::error!(expression, %err, "failed to get query for expression");
            return query::false_q();
        }
        if context.len() != 1 {
            tracing::error!(
                expression,
                stack_size = context.len(),
                "failed to get query: expecting exactly one expression"
            );
            return query::false_q();
        }

        match context.pop().expect("stack has one element") {
            Expr::Query(q) => q,
            Expr::Value(ve) => ve.query(),
            Expr::Multiple(mr) => mr.query(),
            other => {
                tracing::error!(
                    expression,
                    got = ?other,
                    "invalid expression on stack, expecting a query, value expression, or group-by"
                );
                query::false_q()
            }
        }
    }
}

fn to_multiple_results(expr: Expr) -> Option<MultipleResults> {
    match expr {
        Expr::Multiple(mr) => Some(mr),
        Expr::Value(ve) => Some(MultipleResults::Singleton(ve)),
        Expr::Query(q) => Some(MultipleResults::Singleton(ValueExpr::sum(q))),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use interner::intern;
    use meters::Tags;

    fn pair(entries: Vec<(&str, &str)>, value: f64) -> TagsValuePair {
        TagsValuePair::of(entries.into(), value)
    }

    fn sample() -> Vec<TagsValuePair> {
        vec![
            pair(vec![("name", "m1"), ("k1", "v1")], 1.0),
            pair(vec![("name", "m1"), ("k1", "v2")], 2.0),
            pair(vec![("name", "m1"), ("k1", "v1"), ("k2", "w1")], 3.0),
            pair(vec![("name", "m2"), ("k1", "v1")], 10.0),
        ]
    }

    #[test]
    fn eval_sum_with_group_by() {
        let evaluator = Evaluator::new();
        let mut results = evaluator.eval("name,m1,:eq,:sum,(,k1,),:by", &sample());
        results.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value, 2.0);
        assert_eq!(results[1].value, 4.0);
    }

    #[test]
    fn eval_all_passes_matching_measurements() {
        let evaluator = Evaluator::new();
        let results = evaluator.eval("name,m2,:eq,:all", &sample());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 10.0);
    }

    #[test]
    fn eval_bare_query_uses_implicit_sum() {
        let evaluator = Evaluator::new();
        let results = evaluator.eval("name,m1,:eq", &sample());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 6.0);
        assert_eq!(results[0].tags.at(intern("name")), Some(intern("m1")));
    }

    #[test]
    fn eval_empty_input_is_empty() {
        let evaluator = Evaluator::new();
        assert!(evaluator.eval(":true,:all", &[]).is_empty());
    }

    #[test]
    fn eval_bad_program_is_empty() {
        let evaluator = Evaluator::new();
        assert!(evaluator.eval("name,:sum", &sample()).is_empty());
        assert!(evaluator.eval(":bogus-word", &sample()).is_empty());
    }

    #[test]
    fn query_of_programs() {
        let evaluator = Evaluator::new();

        assert_eq!(
            evaluator.query("name,m1,:eq,:sum"),
            query::eq("name", "m1")
        );
        assert_eq!(
            evaluator.query("name,m1,:eq,:all"),
            query::eq("name", "m1")
        );
        assert_eq!(
            evaluator.query("name,m1,:eq,:sum,(,k1,),:by"),
            query::eq("name", "m1")
        );
        assert!(evaluator.query(":true,:all").is_true());
    }

    #[test]
    fn query_failures_yield_false() {
        let evaluator = Evaluator::new();

        // Two expressions left on the stack.
        assert!(evaluator.query("name,m1,:eq,name,m2,:eq").is_false());
        // A bare literal is not a query.
        assert!(evaluator.query("name").is_false());
        // Broken program.
        assert!(evaluator.query("name,:eq").is_false());
    }

    #[test]
    fn eval_with_common_tags_pipeline() {
        let evaluator = Evaluator::new();
        let id = meters::Id::new("m1", vec![("k1", "v1")].into());
        let m = meters::Measurement::new(id, 0, 5.0);
        let common: Tags = vec![("nf.app", "app1")].into();
        let pairs = vec![TagsValuePair::from_measurement(&m, &common)];

        let results = evaluator.eval("nf.app,app1,:eq,:sum", &pairs);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 5.0);
    }
}
