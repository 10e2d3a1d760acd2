use crate::{
    MemoryShard, ShardDocument, ShardReader,
    reader::{DocIdStream, for_each_doc_chunk},
};

fn sample_shard() -> MemoryShard {
    let mut builder = MemoryShard::builder(6);
    builder
        .int_column("x", [5, 3, 5, 9, 1, 3])
        .add_int("tags", 0, 10)
        .add_int("tags", 0, 20)
        .add_int("tags", 3, 20)
        .string_column("country", ["us", "de", "us", "fr", "de", "us"]);
    builder.build()
}

fn collect_docs(stream: &mut dyn DocIdStream, chunk: usize) -> Vec<u32> {
    let mut buf = vec![0u32; chunk];
    let mut out = Vec::new();
    for_each_doc_chunk(stream, &mut buf, |docs| out.extend_from_slice(docs));
    out
}

#[test]
fn test_int_terms_ascending() {
    let shard = sample_shard();
    let mut iter = shard.int_terms("x");
    let mut terms = Vec::new();
    while iter.next() {
        terms.push((iter.term(), iter.doc_freq()));
    }
    assert_eq!(terms, vec![(1, 1), (3, 2), (5, 2), (9, 1)]);
}

#[test]
fn test_int_reset_positions_at_lower_bound() {
    let shard = sample_shard();
    let mut iter = shard.int_terms("x");
    iter.reset(4);
    assert!(iter.next());
    assert_eq!(iter.term(), 5);
    assert_eq!(collect_docs(iter.doc_ids().as_mut(), 1), vec![0, 2]);

    iter.reset(10);
    assert!(!iter.next());

    iter.reset(i64::MIN);
    assert!(iter.next());
    assert_eq!(iter.term(), 1);
}

#[test]
fn test_string_terms_and_docs() {
    let shard = sample_shard();
    let mut iter = shard.string_terms("country");
    iter.reset("e");
    assert!(iter.next());
    assert_eq!(iter.term(), "fr");
    assert!(iter.next());
    assert_eq!(iter.term(), "us");
    assert_eq!(collect_docs(iter.doc_ids().as_mut(), 2), vec![0, 2, 5]);
    assert!(!iter.next());
}

#[test]
fn test_missing_field_has_no_terms() {
    let shard = sample_shard();
    assert!(!shard.int_terms("nope").next());
    assert!(!shard.string_terms("nope").next());
    assert!(shard.metric("nope").is_none());
}

#[test]
fn test_doc_stream_exact_chunk_boundary() {
    let shard = sample_shard();
    let mut iter = shard.string_terms("country");
    iter.reset("us");
    assert!(iter.next());
    assert_eq!(collect_docs(iter.doc_ids().as_mut(), 3), vec![0, 2, 5]);
}

#[test]
fn test_metric_takes_largest_value() {
    let shard = sample_shard();
    let metric = shard.metric("tags").unwrap();
    let mut values = [0i64; 6];
    metric.lookup(&[0, 1, 2, 3, 4, 5], &mut values);
    assert_eq!(values, [20, 0, 0, 20, 0, 0]);
    assert_eq!(metric.min(), 0);
    assert_eq!(metric.max(), 20);
}

#[test]
fn test_values_per_doc() {
    let shard = sample_shard();
    assert_eq!(shard.int_values("tags", 0), vec![10, 20]);
    assert_eq!(shard.string_values("country", 3), vec!["fr".to_string()]);
    assert!(shard.int_values("tags", 1).is_empty());
}

#[test]
fn test_shard_document_from_json() {
    let json = r#"{
        "num_docs": 3,
        "int_fields": { "x": [1, null, [2, 3]] },
        "string_fields": { "s": ["a", "b", null] }
    }"#;
    let doc: ShardDocument = serde_json::from_str(json).unwrap();
    let shard = MemoryShard::try_from(&doc).unwrap();
    assert_eq!(shard.num_docs(), 3);
    assert_eq!(shard.int_values("x", 2), vec![2, 3]);
    assert!(shard.int_values("x", 1).is_empty());
    assert_eq!(shard.string_values("s", 1), vec!["b".to_string()]);
}

#[test]
fn test_shard_document_length_mismatch() {
    let json = r#"{ "num_docs": 2, "int_fields": { "x": [1] } }"#;
    let doc: ShardDocument = serde_json::from_str(json).unwrap();
    let err = MemoryShard::try_from(&doc).unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_total_doc_freq() {
    let shard = sample_shard();
    assert_eq!(shard.int_total_doc_freq("x"), 6);
    assert_eq!(shard.int_total_doc_freq("tags"), 3);
    assert_eq!(shard.string_total_doc_freq("country"), 6);
    assert_eq!(shard.int_total_doc_freq("country"), 0);
    assert_eq!(shard.string_total_doc_freq("nope"), 0);
}
