use shardgroup_memory::MemoryReservationContext;

use crate::{MemoryShard, Query, QuerySearcher, ShardReader};

fn shard() -> MemoryShard {
    let mut builder = MemoryShard::builder(8);
    builder
        .int_column("x", [0, 1, 2, 3, 4, 5, 6, 7])
        .string_column("s", ["a", "b", "c", "a", "b", "c", "a", "b"]);
    builder.build()
}

fn matches(shard: &dyn ShardReader, query: &Query) -> Vec<usize> {
    let memory = MemoryReservationContext::unbounded();
    let searcher = QuerySearcher::new(shard, &memory);
    let bits = searcher.search(query).unwrap();
    let docs = bits.iter().collect();
    drop(bits);
    assert_eq!(memory.used(), 0);
    docs
}

#[test]
fn test_term_queries() {
    let shard = shard();
    assert_eq!(matches(&shard, &Query::int_term("x", 3)), vec![3]);
    assert_eq!(matches(&shard, &Query::string_term("s", "a")), vec![0, 3, 6]);
    assert!(matches(&shard, &Query::int_term("x", 30)).is_empty());
}

#[test]
fn test_range_queries() {
    let shard = shard();
    let exclusive = Query::IntRange {
        field: "x".into(),
        min: 2,
        max: 5,
        max_inclusive: false,
    };
    assert_eq!(matches(&shard, &exclusive), vec![2, 3, 4]);
    let inclusive = Query::IntRange {
        field: "x".into(),
        min: 2,
        max: 5,
        max_inclusive: true,
    };
    assert_eq!(matches(&shard, &inclusive), vec![2, 3, 4, 5]);
    let strings = Query::StringRange {
        field: "s".into(),
        min: "b".into(),
        max: "c".into(),
        max_inclusive: false,
    };
    assert_eq!(matches(&shard, &strings), vec![1, 4, 7]);
}

#[test]
fn test_boolean_queries() {
    let shard = shard();
    let query = Query::And(vec![
        Query::string_term("s", "a"),
        Query::Not(Box::new(Query::int_term("x", 3))),
    ]);
    assert_eq!(matches(&shard, &query), vec![0, 6]);

    let query = Query::Or(vec![Query::int_term("x", 1), Query::int_term("x", 7)]);
    assert_eq!(matches(&shard, &query), vec![1, 7]);

    assert_eq!(matches(&shard, &Query::And(vec![])).len(), 8);
    assert!(matches(&shard, &Query::Or(vec![])).is_empty());
}

#[test]
fn test_search_fails_without_memory() {
    let shard = shard();
    let memory = MemoryReservationContext::new(0);
    let searcher = QuerySearcher::new(&shard, &memory);
    let err = searcher.search(&Query::int_term("x", 1)).unwrap_err();
    assert!(err.is_out_of_memory());
}

#[test]
fn test_query_from_json() {
    let json = r#"{"and": [{"term": {"field": "s", "term": "b"}}, {"int_range": {"field": "x", "min": 0, "max": 5}}]}"#;
    let query: Query = serde_json::from_str(json).unwrap();
    assert_eq!(matches(&shard(), &query), vec![1, 4]);
}
