use crate::query::{self, Query, RelOp};
use interner::Symbol;
use meters::Tags;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

// `in` queries with fewer values than this are split into `eq` queries so
// they can be indexed; larger sets stay as leaf remainders to bound the
// fan-out.
const MAX_IN_VALUES_TO_SPLIT: usize = 5;

type EqPair = (Symbol, Symbol);

/// An index entry annotated with the `eq` clauses extracted from its
/// conjunction. The filters steer trie construction; the remainder is what
/// must still be evaluated directly at a leaf.
#[derive(Clone, PartialEq, Eq, Hash)]
struct Annotated<T> {
    remainder: Arc<Query>,
    value: T,
    // Sorted for a canonical order, so memoization of shared sub-indexes
    // is independent of extraction order.
    filters: Vec<EqPair>,
}

/// Answers "which of N queries match this tag set" in better than O(N) by
/// arranging the `eq` clauses of each query into a trie. Lookup walks the
/// trie guided by the tag set and evaluates only the remainders it visits.
pub struct QueryIndex<T> {
    children: HashMap<EqPair, Arc<QueryIndex<T>>>,
    entries: Vec<(Arc<Query>, T)>,
}

impl<T: Clone + Eq + Hash> QueryIndex<T> {
    pub fn create(entries: &[(Arc<Query>, T)]) -> Arc<QueryIndex<T>> {
        let mut annotated = Vec::with_capacity(entries.len() * 2);
        for (q, value) in entries {
            for sub in query::dnf_list(q) {
                for split_q in split(&sub) {
                    annotated.push(annotate(split_q, value.clone()));
                }
            }
        }
        let mut memo = HashMap::new();
        create_node(&mut memo, annotated)
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        !self.matching(tags).is_empty()
    }

    /// All values whose query matches the tag set.
    pub fn matching(&self, tags: &Tags) -> HashSet<T> {
        let pairs: Vec<EqPair> = tags.iter().copied().collect();
        self.matching_entries(tags, &pairs)
    }

    fn matching_entries(&self, tags: &Tags, remaining: &[EqPair]) -> HashSet<T> {
        match remaining.split_first() {
            None => self.leaf_matches(tags),
            Some((pair, rest)) => {
                let mut res = match self.children.get(pair) {
                    Some(child) => child.matching_entries(tags, rest),
                    None => HashSet::new(),
                };
                res.extend(self.leaf_matches(tags));
                res.extend(self.matching_entries(tags, rest));
                res
            }
        }
    }

    fn leaf_matches(&self, tags: &Tags) -> HashSet<T> {
        self.entries
            .iter()
            .filter(|(q, _)| q.matches(tags))
            .map(|(_, value)| value.clone())
            .collect()
    }
}

impl QueryIndex<Arc<Query>> {
    /// Index a list of queries, with each query as its own value.
    pub fn build(queries: &[Arc<Query>]) -> Arc<QueryIndex<Arc<Query>>> {
        let entries: Vec<_> = queries.iter().map(|q| (q.clone(), q.clone())).collect();
        QueryIndex::create(&entries)
    }
}

fn create_node<T: Clone + Eq + Hash>(
    memo: &mut HashMap<Vec<Annotated<T>>, Arc<QueryIndex<T>>>,
    entries: Vec<Annotated<T>>,
) -> Arc<QueryIndex<T>> {
    if let Some(existing) = memo.get(&entries) {
        return existing.clone();
    }

    let mut grouped: HashMap<EqPair, Vec<Annotated<T>>> = HashMap::new();
    let mut leaf = Vec::new();
    for entry in &entries {
        if entry.filters.is_empty() {
            leaf.push((entry.remainder.clone(), entry.value.clone()));
            continue;
        }
        // The entry descends under each of its filters with that filter
        // removed, so lookups can consume the tag pairs in any order.
        for (i, filter) in entry.filters.iter().enumerate() {
            let mut rest = entry.filters.clone();
            rest.remove(i);
            grouped.entry(*filter).or_default().push(Annotated {
                remainder: entry.remainder.clone(),
                value: entry.value.clone(),
                filters: rest,
            });
        }
    }

    let mut children = HashMap::with_capacity(grouped.len());
    for (pair, group) in grouped {
        children.insert(pair, create_node(memo, group));
    }

    let node = Arc::new(QueryIndex {
        children,
        entries: leaf,
    });
    memo.insert(entries, node.clone());
    node
}

/// Split small `in` clauses into `eq` queries, distributing through `and`.
fn split(q: &Arc<Query>) -> Vec<Arc<Query>> {
    match q.as_ref() {
        Query::And(q1, q2) => {
            let left = split(q1);
            let right = split(q2);
            let mut res = Vec::with_capacity(left.len() * right.len());
            for a in &left {
                for b in &right {
                    res.push(query::and_q(a.clone(), b.clone()));
                }
            }
            res
        }
        Query::In { key, values } if values.len() < MAX_IN_VALUES_TO_SPLIT => values
            .iter()
            .map(|v| query::relop(RelOp::Eq, *key, *v))
            .collect(),
        _ => vec![q.clone()],
    }
}

/// Flatten nested `and` into the list of its clauses.
fn conjunction_list(q: &Arc<Query>) -> Vec<Arc<Query>> {
    match q.as_ref() {
        Query::And(q1, q2) => {
            let mut res = conjunction_list(q1);
            res.extend(conjunction_list(q2));
            res
        }
        _ => vec![q.clone()],
    }
}

fn annotate<T>(q: Arc<Query>, value: T) -> Annotated<T> {
    let mut distinct: Vec<Arc<Query>> = Vec::new();
    for clause in conjunction_list(&q) {
        if !distinct.contains(&clause) {
            distinct.push(clause);
        }
    }

    let mut filters: Vec<EqPair> = Vec::new();
    let mut remainder = Vec::new();
    for clause in distinct {
        match clause.as_ref() {
            Query::Relop {
                op: RelOp::Eq,
                key,
                value,
            } => {
                let pair = (*key, *value);
                if !filters.contains(&pair) {
                    filters.push(pair);
                }
            }
            _ => remainder.push(clause),
        }
    }
    filters.sort();

    let remainder_query = if remainder.is_empty() {
        query::true_q()
    } else {
        query::and_queries(remainder)
    };
    Annotated {
        remainder: remainder_query,
        value,
        filters,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::{and_q, eq, gt, has, in_q, not_q, or_q, re, true_q};

    fn tags(entries: Vec<(&str, &str)>) -> Tags {
        entries.into()
    }

    fn check_index_matches(queries: Vec<Arc<Query>>, tag_sets: Vec<Tags>) {
        let index = QueryIndex::build(&queries);
        for t in &tag_sets {
            let expected: HashSet<Arc<Query>> = queries
                .iter()
                .filter(|q| q.matches(t))
                .cloned()
                .collect();
            assert_eq!(index.matching(t), expected, "tags {:?}", t);
        }
    }

    #[test]
    fn single_query_roundtrip() {
        let q = and_q(eq("name", "m1"), eq("k1", "v1"));
        let index = QueryIndex::build(&[q.clone()]);

        assert!(index.matches(&tags(vec![("name", "m1"), ("k1", "v1")])));
        assert!(!index.matches(&tags(vec![("name", "m1")])));
        assert!(!index.matches(&tags(vec![("name", "m2"), ("k1", "v1")])));

        let matched = index.matching(&tags(vec![("name", "m1"), ("k1", "v1"), ("x", "y")]));
        assert_eq!(matched.len(), 1);
        assert!(matched.contains(&q));
    }

    #[test]
    fn eq_clause_order_does_not_matter() {
        let q = and_q(eq("a", "1"), eq("b", "2"));
        let index = QueryIndex::build(&[q]);

        // Tag iteration order differs from filter extraction order.
        assert!(index.matches(&tags(vec![("b", "2"), ("a", "1")])));
        assert!(index.matches(&tags(vec![("a", "1"), ("b", "2"), ("c", "3")])));
    }

    #[test]
    fn mixed_queries_match_brute_force() {
        let queries = vec![
            and_q(eq("name", "m1"), eq("k1", "v1")),
            and_q(eq("name", "m1"), gt("k1", "a")),
            or_q(eq("name", "m2"), eq("name", "m3")),
            and_q(eq("name", "m4"), not_q(eq("k1", "v1"))),
            re("name", "m.*"),
            has("k2"),
            in_q("name", vec!["m5", "m6"]),
            true_q(),
        ];
        let tag_sets = vec![
            tags(vec![("name", "m1"), ("k1", "v1")]),
            tags(vec![("name", "m1"), ("k1", "bbb")]),
            tags(vec![("name", "m2")]),
            tags(vec![("name", "m3"), ("k2", "x")]),
            tags(vec![("name", "m4"), ("k1", "v1")]),
            tags(vec![("name", "m4"), ("k1", "v2")]),
            tags(vec![("name", "m5")]),
            tags(vec![("name", "m6")]),
            tags(vec![("other", "z")]),
            tags(vec![]),
        ];
        check_index_matches(queries, tag_sets);
    }

    #[test]
    fn large_in_sets_are_not_split() {
        let values = vec!["a", "b", "c", "d", "e", "f"];
        let queries = vec![and_q(eq("name", "m1"), in_q("k", values))];
        let tag_sets = vec![
            tags(vec![("name", "m1"), ("k", "c")]),
            tags(vec![("name", "m1"), ("k", "z")]),
            tags(vec![("name", "m2"), ("k", "c")]),
        ];
        check_index_matches(queries, tag_sets);
    }

    #[test]
    fn dnf_expansion_is_applied() {
        let q = and_q(
            or_q(eq("a", "1"), eq("a", "2")),
            or_q(eq("b", "1"), eq("b", "2")),
        );
        let queries = vec![q];
        let tag_sets = vec![
            tags(vec![("a", "1"), ("b", "1")]),
            tags(vec![("a", "1"), ("b", "2")]),
            tags(vec![("a", "2"), ("b", "1")]),
            tags(vec![("a", "2"), ("b", "2")]),
            tags(vec![("a", "1")]),
            tags(vec![("a", "3"), ("b", "1")]),
        ];
        check_index_matches(queries, tag_sets);
    }

    #[test]
    fn values_can_be_arbitrary() {
        let entries = vec![
            (eq("name", "m1"), "sub-1".to_owned()),
            (eq("name", "m1"), "sub-2".to_owned()),
            (eq("name", "m2"), "sub-3".to_owned()),
        ];
        let index = QueryIndex::create(&entries);

        let matched = index.matching(&tags(vec![("name", "m1")]));
        assert_eq!(matched.len(), 2);
        assert!(matched.contains("sub-1"));
        assert!(matched.contains("sub-2"));
    }

    #[test]
    fn empty_index_matches_nothing() {
        let index: Arc<QueryIndex<Arc<Query>>> = QueryIndex::build(&[]);
        assert!(!index.matches(&tags(vec![("name", "m1")])));
    }
}
