mod memory_shard_tests;
mod query_tests;
