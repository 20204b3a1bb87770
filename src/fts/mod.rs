//! Full-text search: tokenization and BM25 scoring over the storage layer's
//! inverted index.
//!
//! This module owns none of the index state itself — every posting list,
//! document length, and term list lives in the redb tables the storage
//! layer exposes (`FTS_POSTINGS_TABLE`, `FTS_DOC_LEN_TABLE`,
//! `FTS_DOC_TERMS_TABLE`). [`Bm25Index`] is a stateless scorer that reads
//! and writes through [`StorageEngine`](crate::storage::StorageEngine).

mod bm25;
mod tokenizer;

pub use bm25::Bm25Index;
pub use tokenizer::tokenize;
