//! Temporary JSON fixtures.

use std::io::Write;

use shardgroup_columnar::ShardDocument;

/// Writes `value` as JSON into a temporary file that lives as long as the
/// returned handle.
pub fn write_json(value: &serde_json::Value) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.flush()?;
    Ok(file)
}

/// Writes a shard document as JSON.
pub fn write_shard(doc: &ShardDocument) -> anyhow::Result<tempfile::NamedTempFile> {
    write_json(&serde_json::to_value(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_round_trips_through_file() {
        let doc = ShardDocument {
            num_docs: 2,
            ..Default::default()
        };
        let file = write_shard(&doc).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let back: ShardDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(back.num_docs, 2);
    }
}
