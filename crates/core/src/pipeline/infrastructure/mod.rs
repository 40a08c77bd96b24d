pub mod jsonl_embedding_source;
