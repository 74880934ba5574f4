use interner::{intern, Symbol};
use meters::{Tag, Tags};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for RelOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelOp::Eq => "=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A boolean predicate over a tag set. The variant set is closed; new
/// queries are built through the smart constructors in [`self`], which
/// apply the standard simplifications.
#[derive(Debug)]
pub enum Query {
    True,
    False,
    HasKey(Symbol),
    Relop {
        op: RelOp,
        key: Symbol,
        value: Symbol,
    },
    Regex {
        key: Symbol,
        pattern: String,
        ignore_case: bool,
        // None when the pattern failed to compile: such a query never
        // matches anything.
        compiled: Option<regex::Regex>,
    },
    In {
        key: Symbol,
        values: Vec<Symbol>,
    },
    Not(Arc<Query>),
    And(Arc<Query>, Arc<Query>),
    Or(Arc<Query>, Arc<Query>),
}

// Discriminant used in hashing, mirroring declaration order.
fn type_tag(q: &Query) -> u64 {
    match q {
        Query::HasKey(_) => 0,
        Query::Relop { .. } => 1,
        Query::Regex { .. } => 2,
        Query::In { .. } => 3,
        Query::True => 4,
        Query::False => 5,
        Query::Not(_) => 6,
        Query::Or(..) => 7,
        Query::And(..) => 8,
    }
}

fn symbol_hash(s: Symbol) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

fn str_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

impl Query {
    pub fn matches(&self, tags: &Tags) -> bool {
        match self {
            Query::True => true,
            Query::False => false,
            Query::HasKey(k) => tags.has(*k),
            Query::Relop { op, key, value } => match tags.at(*key) {
                Some(current) => match op {
                    RelOp::Eq => current == *value,
                    RelOp::Lt => current.as_str() < value.as_str(),
                    RelOp::Le => current.as_str() <= value.as_str(),
                    RelOp::Gt => current.as_str() > value.as_str(),
                    RelOp::Ge => current.as_str() >= value.as_str(),
                },
                None => false,
            },
            Query::Regex { key, compiled, .. } => match (tags.at(*key), compiled) {
                (Some(current), Some(re)) => re.is_match(current.as_str()),
                _ => false,
            },
            Query::In { key, values } => match tags.at(*key) {
                Some(current) => values.contains(&current),
                None => false,
            },
            Query::Not(q) => !q.matches(tags),
            Query::And(q1, q2) => q1.matches(tags) && q2.matches(tags),
            Query::Or(q1, q2) => q1.matches(tags) || q2.matches(tags),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Query::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Query::False)
    }

    /// The tags implied by this query: an `eq` contributes its pair, an
    /// `and` the union of its operands. Everything else contributes
    /// nothing. Used for the output tags of aggregations.
    pub fn tags(&self) -> Tags {
        match self {
            Query::Relop {
                op: RelOp::Eq,
                key,
                value,
            } => {
                let mut tags = Tags::new();
                tags.add_tag(Tag::of(*key, *value));
                tags
            }
            Query::And(q1, q2) => {
                let mut tags = q1.tags();
                tags.add_all(&q2.tags());
                tags
            }
            _ => Tags::new(),
        }
    }

    pub fn query_hash(&self) -> u64 {
        let n = type_tag(self);
        match self {
            Query::True | Query::False => n,
            Query::HasKey(k) => (n << 16) ^ symbol_hash(*k),
            Query::Relop { key, value, .. } => {
                (n << 16) ^ symbol_hash(*key) ^ symbol_hash(*value)
            }
            Query::Regex { key, pattern, .. } => {
                (n << 16) ^ symbol_hash(*key) ^ str_hash(pattern)
            }
            Query::In { key, values } => {
                let mut res = (n << 16) ^ symbol_hash(*key);
                for v in values {
                    res ^= symbol_hash(*v);
                }
                res
            }
            Query::Not(q) => q.query_hash().wrapping_sub(1),
            Query::And(q1, q2) | Query::Or(q1, q2) => q1.query_hash() ^ q2.query_hash() ^ n,
        }
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Query::True, Query::True) => true,
            (Query::False, Query::False) => true,
            (Query::HasKey(a), Query::HasKey(b)) => a == b,
            (
                Query::Relop { op, key, value },
                Query::Relop {
                    op: op2,
                    key: key2,
                    value: value2,
                },
            ) => op == op2 && key == key2 && value == value2,
            (
                Query::Regex {
                    key,
                    pattern,
                    ignore_case,
                    ..
                },
                Query::Regex {
                    key: key2,
                    pattern: pattern2,
                    ignore_case: ignore_case2,
                    ..
                },
            ) => key == key2 && pattern == pattern2 && ignore_case == ignore_case2,
            (
                Query::In { key, values },
                Query::In {
                    key: key2,
                    values: values2,
                },
            ) => key == key2 && values == values2,
            (Query::Not(a), Query::Not(b)) => a == b,
            // `and` and `or` are commutative.
            (Query::And(a1, a2), Query::And(b1, b2)) => {
                (a1 == b1 && a2 == b2) || (a1 == b2 && a2 == b1)
            }
            (Query::Or(a1, a2), Query::Or(b1, b2)) => {
                (a1 == b1 && a2 == b2) || (a1 == b2 && a2 == b1)
            }
            _ => false,
        }
    }
}

impl Eq for Query {}

impl std::hash::Hash for Query {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.query_hash());
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::True => write!(f, "TrueQuery"),
            Query::False => write!(f, "FalseQuery"),
            Query::HasKey(k) => write!(f, "HasKey({})", k),
            Query::Relop { op, key, value } => write!(f, "RelopQuery({}{}{})", key, op, value),
            Query::Regex { key, pattern, .. } => write!(f, "RegexQuery({} ~ {})", key, pattern),
            Query::In { key, values } => {
                write!(f, "InQuery({},[", key)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "])")
            }
            Query::Not(q) => write!(f, "NotQuery({})", q),
            Query::And(q1, q2) => write!(f, "AndQuery({}, {})", q1, q2),
            Query::Or(q1, q2) => write!(f, "OrQuery({}, {})", q1, q2),
        }
    }
}

pub fn true_q() -> Arc<Query> {
    Arc::new(Query::True)
}

pub fn false_q() -> Arc<Query> {
    Arc::new(Query::False)
}

pub fn has(k: &str) -> Arc<Query> {
    Arc::new(Query::HasKey(intern(k)))
}

pub fn relop(op: RelOp, k: Symbol, v: Symbol) -> Arc<Query> {
    Arc::new(Query::Relop { op, key: k, value: v })
}

pub fn eq(k: &str, v: &str) -> Arc<Query> {
    relop(RelOp::Eq, intern(k), intern(v))
}

pub fn lt(k: &str, v: &str) -> Arc<Query> {
    relop(RelOp::Lt, intern(k), intern(v))
}

pub fn le(k: &str, v: &str) -> Arc<Query> {
    relop(RelOp::Le, intern(k), intern(v))
}

pub fn gt(k: &str, v: &str) -> Arc<Query> {
    relop(RelOp::Gt, intern(k), intern(v))
}

pub fn ge(k: &str, v: &str) -> Arc<Query> {
    relop(RelOp::Ge, intern(k), intern(v))
}

pub fn in_q(k: &str, values: Vec<&str>) -> Arc<Query> {
    Arc::new(Query::In {
        key: intern(k),
        values: values.into_iter().map(intern).collect(),
    })
}

pub fn regex(k: Symbol, pattern: &str, ignore_case: bool) -> Arc<Query> {
    // Patterns are anchored at the start of the value.
    let compiled = regex::RegexBuilder::new(&format!("^(?:{})", pattern))
        .case_insensitive(ignore_case)
        .build();
    let compiled = match compiled {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::warn!(pattern, %err, "invalid regex");
            None
        }
    };
    Arc::new(Query::Regex {
        key: k,
        pattern: pattern.to_owned(),
        ignore_case,
        compiled,
    })
}

pub fn re(k: &str, pattern: &str) -> Arc<Query> {
    regex(intern(k), pattern, false)
}

pub fn reic(k: &str, pattern: &str) -> Arc<Query> {
    regex(intern(k), pattern, true)
}

pub fn not_q(q: Arc<Query>) -> Arc<Query> {
    if q.is_false() {
        true_q()
    } else if q.is_true() {
        false_q()
    } else {
        Arc::new(Query::Not(q))
    }
}

fn is_expensive(q: &Query) -> bool {
    matches!(q, Query::Regex { .. } | Query::And(..) | Query::Or(..))
}

pub fn or_q(q1: Arc<Query>, q2: Arc<Query>) -> Arc<Query> {
    if q1.is_true() {
        return q1;
    }
    if q2.is_true() {
        return q2;
    }
    if q1.is_false() {
        return q2;
    }
    if q2.is_false() {
        return q1;
    }
    if q1 == q2 {
        return q1;
    }
    // Evaluate the cheaper operand first.
    if is_expensive(&q1) {
        Arc::new(Query::Or(q2, q1))
    } else {
        Arc::new(Query::Or(q1, q2))
    }
}

pub fn and_q(q1: Arc<Query>, q2: Arc<Query>) -> Arc<Query> {
    if q1.is_false() {
        return q1;
    }
    if q2.is_false() {
        return q2;
    }
    if q1.is_true() {
        return q2;
    }
    if q2.is_true() {
        return q1;
    }
    if q1 == q2 {
        return q1;
    }
    if is_expensive(&q1) {
        Arc::new(Query::And(q2, q1))
    } else {
        Arc::new(Query::And(q1, q2))
    }
}

pub fn and_queries(queries: Vec<Arc<Query>>) -> Arc<Query> {
    queries.into_iter().fold(true_q(), and_q)
}

/// Expand a query into a list of sub-queries whose OR is equivalent and
/// where no sub-query contains a top-level `or`: distribute `and` over
/// `or`, push `not` through with De Morgan, collapse double negation.
pub fn dnf_list(query: &Arc<Query>) -> Vec<Arc<Query>> {
    match query.as_ref() {
        Query::And(q1, q2) => {
            let left = dnf_list(q1);
            let right = dnf_list(q2);
            let mut res = Vec::with_capacity(left.len() * right.len());
            for a in &left {
                for b in &right {
                    res.push(and_q(a.clone(), b.clone()));
                }
            }
            res
        }
        Query::Or(q1, q2) => {
            let mut res = dnf_list(q1);
            res.extend(dnf_list(q2));
            res
        }
        Query::Not(inner) => match inner.as_ref() {
            Query::And(q1, q2) => {
                let mut res = dnf_list(&not_q(q1.clone()));
                res.extend(dnf_list(&not_q(q2.clone())));
                res
            }
            Query::Or(q1, q2) => {
                dnf_list(&and_q(not_q(q1.clone()), not_q(q2.clone())))
            }
            Query::Not(q) => vec![q.clone()],
            _ => vec![query.clone()],
        },
        _ => vec![query.clone()],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tags(entries: Vec<(&str, &str)>) -> Tags {
        entries.into()
    }

    #[test]
    fn relational_matching() {
        let t = tags(vec![("name", "m1"), ("k", "bbb")]);

        assert!(eq("k", "bbb").matches(&t));
        assert!(!eq("k", "bb").matches(&t));
        assert!(lt("k", "ccc").matches(&t));
        assert!(le("k", "bbb").matches(&t));
        assert!(gt("k", "aaa").matches(&t));
        assert!(ge("k", "bbb").matches(&t));
        assert!(!gt("missing", "a").matches(&t));
    }

    #[test]
    fn has_and_in_matching() {
        let t = tags(vec![("k", "v2")]);
        assert!(has("k").matches(&t));
        assert!(!has("other").matches(&t));
        assert!(in_q("k", vec!["v1", "v2"]).matches(&t));
        assert!(!in_q("k", vec!["v3"]).matches(&t));
    }

    #[test]
    fn regex_matching_is_anchored() {
        let t = tags(vec![("name", "requestLatency")]);
        assert!(re("name", "request").matches(&t));
        assert!(!re("name", "Latency").matches(&t));
        assert!(re("name", ".*Latency").matches(&t));
        assert!(reic("name", "REQUEST").matches(&t));
        assert!(!re("name", "REQUEST").matches(&t));
    }

    #[test]
    fn invalid_regex_never_matches() {
        let q = re("name", "(unclosed");
        assert!(!q.matches(&tags(vec![("name", "(unclosed")])));
    }

    #[test]
    fn boolean_operators() {
        let t = tags(vec![("a", "1"), ("b", "2")]);
        let q = and_q(eq("a", "1"), eq("b", "2"));
        assert!(q.matches(&t));
        assert!(!and_q(eq("a", "1"), eq("b", "3")).matches(&t));
        assert!(or_q(eq("a", "0"), eq("b", "2")).matches(&t));
        assert!(not_q(eq("a", "0")).matches(&t));
    }

    #[test]
    fn constructors_simplify() {
        assert!(not_q(true_q()).is_false());
        assert!(not_q(false_q()).is_true());
        assert!(and_q(true_q(), eq("a", "1")).eq(&eq("a", "1")));
        assert!(and_q(false_q(), eq("a", "1")).is_false());
        assert!(or_q(true_q(), eq("a", "1")).is_true());
        assert!(or_q(false_q(), eq("a", "1")).eq(&eq("a", "1")));
        assert_eq!(and_q(eq("a", "1"), eq("a", "1")), eq("a", "1"));
    }

    #[test]
    fn cheap_operand_goes_left() {
        let q = and_q(re("a", "x.*"), eq("b", "1"));
        match q.as_ref() {
            Query::And(left, _) => assert!(matches!(left.as_ref(), Query::Relop { .. })),
            other => panic!("expected and, got {}", other),
        }
    }

    #[test]
    fn and_or_equality_is_commutative() {
        let a = and_q(eq("a", "1"), eq("b", "2"));
        let b = and_q(eq("b", "2"), eq("a", "1"));
        assert_eq!(a, b);
        assert_eq!(a.query_hash(), b.query_hash());

        let c = or_q(eq("a", "1"), eq("b", "2"));
        let d = or_q(eq("b", "2"), eq("a", "1"));
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[test]
    fn dnf_distributes_and_over_or() {
        let a = eq("k", "a");
        let b = eq("k", "b");
        let c = eq("c", "1");
        let d = eq("d", "1");

        let q = and_q(
            or_q(a.clone(), b.clone()),
            or_q(c.clone(), d.clone()),
        );
        let list = dnf_list(&q);
        assert_eq!(list.len(), 4);

        let expected = [
            and_q(a.clone(), c.clone()),
            and_q(a, d.clone()),
            and_q(b.clone(), c),
            and_q(b, d),
        ];
        for e in &expected {
            assert!(list.iter().any(|q| q == e), "missing {}", e);
        }
    }

    #[test]
    fn dnf_pushes_not_through() {
        let a = eq("a", "1");
        let b = eq("b", "1");

        // not(a and b) = not a or not b
        let list = dnf_list(&not_q(and_q(a.clone(), b.clone())));
        assert_eq!(list.len(), 2);
        assert!(list.contains(&not_q(a.clone())));
        assert!(list.contains(&not_q(b.clone())));

        // not(a or b) = not a and not b
        let list = dnf_list(&not_q(or_q(a.clone(), b.clone())));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0], and_q(not_q(a.clone()), not_q(b)));

        // not(not a) = a
        let list = dnf_list(&not_q(not_q(a.clone())));
        assert_eq!(list, vec![a]);
    }

    #[test]
    fn dnf_or_is_equivalent() {
        let cases = vec![
            and_q(or_q(eq("a", "1"), eq("b", "2")), eq("c", "3")),
            not_q(and_q(eq("a", "1"), or_q(eq("b", "2"), has("c")))),
            or_q(not_q(eq("a", "1")), and_q(has("b"), eq("c", "3"))),
        ];
        let tag_sets = vec![
            tags(vec![("a", "1"), ("b", "2"), ("c", "3")]),
            tags(vec![("a", "1")]),
            tags(vec![("b", "2"), ("c", "3")]),
            tags(vec![("c", "3")]),
            tags(vec![]),
        ];

        for q in &cases {
            for t in &tag_sets {
                let dnf_matches = dnf_list(q).iter().any(|sub| sub.matches(t));
                assert_eq!(q.matches(t), dnf_matches, "query {} tags {:?}", q, t);
            }
        }
    }

    #[test]
    fn eq_query_contributes_tags() {
        let q = and_q(eq("a", "1"), eq("b", "2"));
        let t = q.tags();
        assert_eq!(t.len(), 2);
        assert_eq!(t.at(intern("a")), Some(intern("1")));

        assert!(gt("a", "1").tags().is_empty());
        assert!(true_q().tags().is_empty());
    }
}
