//! Inspect command implementation

use anyhow::Result;
use serde::Serialize;
use shardgroup_columnar::{MemoryShard, ShardReader};

#[derive(Debug, Serialize)]
struct ShardSummary {
    num_docs: usize,
    fields: Vec<FieldInfo>,
}

#[derive(Debug, Serialize)]
struct FieldInfo {
    name: String,
    #[serde(rename = "type")]
    field_type: &'static str,
    term_count: usize,
    /// Sum of posting list lengths.
    postings: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<serde_json::Value>,
}

pub fn run(shard_path: String) -> Result<()> {
    let shard = super::load_shard(&shard_path)?;
    println!("{}", serde_json::to_string_pretty(&summarize(&shard))?);
    Ok(())
}

fn summarize(shard: &MemoryShard) -> ShardSummary {
    let mut fields = Vec::new();
    for name in shard.int_fields() {
        let mut terms = shard.int_terms(&name);
        let mut info = FieldInfo::new(name.clone(), "int");
        while terms.next() {
            info.add_term(terms.doc_freq(), serde_json::Value::from(terms.term()));
        }
        fields.push(info);
    }
    for name in shard.string_fields() {
        let mut terms = shard.string_terms(&name);
        let mut info = FieldInfo::new(name.clone(), "string");
        while terms.next() {
            info.add_term(terms.doc_freq(), serde_json::Value::from(terms.term()));
        }
        fields.push(info);
    }
    ShardSummary {
        num_docs: shard.num_docs(),
        fields,
    }
}

impl FieldInfo {
    fn new(name: String, field_type: &'static str) -> FieldInfo {
        FieldInfo {
            name,
            field_type,
            term_count: 0,
            postings: 0,
            min: None,
            max: None,
        }
    }

    /// Terms arrive in ascending order.
    fn add_term(&mut self, doc_freq: u32, term: serde_json::Value) {
        self.term_count += 1;
        self.postings += doc_freq as u64;
        if self.min.is_none() {
            self.min = Some(term.clone());
        }
        self.max = Some(term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        let mut builder = MemoryShard::builder(3);
        builder
            .int_column("x", [5, 1, 5])
            .add_string("s", 0, "b")
            .add_string("s", 0, "a");
        let summary = serde_json::to_value(summarize(&builder.build())).unwrap();
        assert_eq!(
            summary,
            serde_json::json!({
                "num_docs": 3,
                "fields": [
                    {"name": "x", "type": "int", "term_count": 2, "postings": 3, "min": 1, "max": 5},
                    {"name": "s", "type": "string", "term_count": 2, "postings": 2, "min": "a", "max": "b"}
                ]
            })
        );
    }
}
