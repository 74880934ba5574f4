use crate::expressions::{AggregateOp, MultipleResults, ValueExpr};
use crate::query::{self, Query, RelOp};
use interner::intern;
use std::sync::Arc;

/// One element of the evaluation stack.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(String),
    /// Tokens between `(` and `)`, captured verbatim.
    List(Vec<String>),
    Query(Arc<Query>),
    Value(ValueExpr),
    Multiple(MultipleResults),
}

impl Expr {
    fn type_name(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::List(_) => "list",
            Expr::Query(_) => "query",
            Expr::Value(_) => "value expression",
            Expr::Multiple(_) => "multi-result expression",
        }
    }
}

/// The evaluation stack for one program.
#[derive(Debug, Default)]
pub struct Context {
    stack: Vec<Expr>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn push(&mut self, expr: Expr) {
        self.stack.push(expr);
    }

    pub fn pop(&mut self) -> Result<Expr, String> {
        self.stack
            .pop()
            .ok_or_else(|| "stack underflow".to_owned())
    }

    pub fn pop_string(&mut self) -> Result<String, String> {
        match self.pop()? {
            Expr::Literal(s) => Ok(s),
            other => Err(format!(
                "expecting a string on the stack, got a {}",
                other.type_name()
            )),
        }
    }

    pub fn pop_query(&mut self, word: &str) -> Result<Arc<Query>, String> {
        match self.pop()? {
            Expr::Query(q) => Ok(q),
            other => Err(format!(
                ":{} was expecting a query on the stack, got a {}",
                word,
                other.type_name()
            )),
        }
    }

    pub fn pop_list(&mut self, word: &str) -> Result<Vec<String>, String> {
        match self.pop()? {
            Expr::List(items) => Ok(items),
            other => Err(format!(
                ":{} was expecting a list on the stack, got a {}",
                word,
                other.type_name()
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Split a program on `,`, trimming whitespace per token and dropping
/// empty tokens.
pub fn tokenize(program: &str) -> Vec<&str> {
    program
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_word(token: &str) -> bool {
    token.starts_with(':')
}

/// Coerce a stack element into a value expression: numeric literals become
/// constants, queries aggregate with the implicit `:sum`.
fn value_expr_from(expr: Expr) -> Result<ValueExpr, String> {
    match expr {
        Expr::Literal(s) => s
            .parse::<f64>()
            .map(ValueExpr::Constant)
            .map_err(|_| format!("expecting a number, got '{}'", s)),
        Expr::Query(q) => Ok(ValueExpr::sum(q)),
        Expr::Value(ve) => Ok(ve),
        other => Err(format!(
            "expecting a value expression or query, got a {}",
            other.type_name()
        )),
    }
}

fn relop_word(context: &mut Context, op: RelOp) -> Result<(), String> {
    let v = context.pop_string()?;
    let k = context.pop_string()?;
    context.push(Expr::Query(query::relop(op, intern(&k), intern(&v))));
    Ok(())
}

fn regex_word(context: &mut Context, ignore_case: bool) -> Result<(), String> {
    let v = context.pop_string()?;
    let k = context.pop_string()?;
    context.push(Expr::Query(query::regex(intern(&k), &v, ignore_case)));
    Ok(())
}

fn aggregate_word(context: &mut Context, word: &str, op: AggregateOp) -> Result<(), String> {
    let q = context.pop_query(word)?;
    context.push(Expr::Value(ValueExpr::aggregate(op, q)));
    Ok(())
}

fn group_by_word(context: &mut Context) -> Result<(), String> {
    let keys = context.pop_list("by")?;
    let expr = value_expr_from(context.pop()?)
        .map_err(|err| format!(":by was expecting a list and a data expression: {}", err))?;
    context.push(Expr::Multiple(MultipleResults::GroupBy {
        keys: keys.iter().map(|k| intern(k)).collect(),
        expr,
    }));
    Ok(())
}

fn keep_drop_word(context: &mut Context, keep: bool) -> Result<(), String> {
    let word = if keep { "keep-tags" } else { "drop-tags" };
    let keys = context.pop_list(word)?;
    let expr = value_expr_from(context.pop()?).map_err(|err| {
        format!(
            ":{} was expecting a list and a data expression: {}",
            word, err
        )
    })?;
    context.push(Expr::Multiple(MultipleResults::KeepOrDropTags {
        keys: keys.iter().map(|k| intern(k)).collect(),
        expr,
        keep,
    }));
    Ok(())
}

/// Execute one vocabulary word against the stack.
fn execute_word(context: &mut Context, word: &str) -> Result<(), String> {
    match word {
        "has" => {
            let k = context.pop_string()?;
            context.push(Expr::Query(query::has(&k)));
            Ok(())
        }
        "eq" => relop_word(context, RelOp::Eq),
        "lt" => relop_word(context, RelOp::Lt),
        "le" => relop_word(context, RelOp::Le),
        "gt" => relop_word(context, RelOp::Gt),
        "ge" => relop_word(context, RelOp::Ge),
        "re" => regex_word(context, false),
        "reic" => regex_word(context, true),
        "in" => {
            let values = context.pop_list("in")?;
            let k = context.pop_string()?;
            context.push(Expr::Query(query::in_q(
                &k,
                values.iter().map(String::as_str).collect(),
            )));
            Ok(())
        }
        "not" => {
            let q = context.pop_query("not")?;
            context.push(Expr::Query(query::not_q(q)));
            Ok(())
        }
        "and" => {
            let q2 = context.pop_query("and")?;
            let q1 = context.pop_query("and")?;
            context.push(Expr::Query(query::and_q(q1, q2)));
            Ok(())
        }
        "or" => {
            let q2 = context.pop_query("or")?;
            let q1 = context.pop_query("or")?;
            context.push(Expr::Query(query::or_q(q1, q2)));
            Ok(())
        }
        "true" => {
            context.push(Expr::Query(query::true_q()));
            Ok(())
        }
        "false" => {
            context.push(Expr::Query(query::false_q()));
            Ok(())
        }
        "count" => aggregate_word(context, "count", AggregateOp::Count),
        "sum" => aggregate_word(context, "sum", AggregateOp::Sum),
        "min" => aggregate_word(context, "min", AggregateOp::Min),
        "max" => aggregate_word(context, "max", AggregateOp::Max),
        "avg" => aggregate_word(context, "avg", AggregateOp::Avg),
        "all" => {
            let q = context.pop_query("all")?;
            context.push(Expr::Multiple(MultipleResults::All(q)));
            Ok(())
        }
        "by" => group_by_word(context),
        "keep-tags" => keep_drop_word(context, true),
        "drop-tags" => keep_drop_word(context, false),
        unknown => Err(format!("unknown word :{}", unknown)),
    }
}

/// Run a program against a context. Words execute at list depth 0; inside
/// parentheses tokens are captured literally into a list.
pub fn execute(context: &mut Context, program: &str) -> Result<(), String> {
    let mut list_depth = 0i32;

    for token in tokenize(program) {
        match token {
            "(" => {
                list_depth += 1;
                if list_depth == 1 {
                    context.push(Expr::List(Vec::new()));
                } else {
                    push_to_list(context, token)?;
                }
            }
            ")" => {
                list_depth -= 1;
                if list_depth > 0 {
                    push_to_list(context, token)?;
                } else if list_depth < 0 {
                    return Err("unbalanced parenthesis".to_owned());
                }
            }
            _ if list_depth > 0 => push_to_list(context, token)?,
            _ if is_word(token) => execute_word(context, &token[1..])?,
            _ => context.push(Expr::Literal(token.to_owned())),
        }
    }

    if list_depth != 0 {
        return Err("unbalanced parenthesis".to_owned());
    }
    Ok(())
}

fn push_to_list(context: &mut Context, token: &str) -> Result<(), String> {
    match context.stack.last_mut() {
        Some(Expr::List(items)) => {
            items.push(token.to_owned());
            Ok(())
        }
        _ => Err("expecting a list on the stack".to_owned()),
    }
}
