//! # docqa-retrieval
//!
//! Adaptive, cached, hybrid retrieval for question answering over a single
//! document.
//!
//! A document is chunked, embedded and stored once; every question is then
//! classified, embedded through a query cache, searched with an
//! intent-specific strategy and reranked before the chunks are handed to an
//! answer generator.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ Document │──▶│ Chunk+Embed  │──▶│ VectorStore        │
//! │  text    │   │ (ingest)     │   │ + FileVectorRouter │
//! └──────────┘   └──────────────┘   └─────────┬──────────┘
//!                                             │
//! ┌──────────┐   ┌──────────────┐   ┌─────────▼──────────┐
//! │ Question │──▶│ Intent+Terms │──▶│ Semantic / Hybrid  │──▶ ranked chunks
//! └──────────┘   │ Query cache  │   │ Rerank + budget    │
//!                └──────────────┘   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunk and result types |
//! | [`error`] | Retrieval error taxonomy |
//! | [`chunk`] | Normalization, table flattening, splitting, chunk metadata |
//! | [`embedding`] | Embedding providers and cosine similarity |
//! | [`store`] | External vector stores (in-memory, Chroma) |
//! | [`cache`] | Chunk embedding LRU and semantic query cache |
//! | [`router`] | Per-file in-memory vector indexes |
//! | [`sweep`] | Stoppable background expiry tasks |
//! | [`terms`] | Key-term extraction |
//! | [`intent`] | Query intent classification |
//! | [`adaptive`] | Similarity-driven result sizing |
//! | [`fusion`] | Deduplication, keyword scoring, reciprocal rank fusion |
//! | [`search`] | Semantic, keyword and hybrid search for one file |
//! | [`ingest`] | Document ingestion with content deduplication |
//! | [`rerank`] | Intent-specific reordering |
//! | [`orchestrator`] | Question-to-chunks pipeline |

pub mod adaptive;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod intent;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod router;
pub mod search;
pub mod store;
pub mod sweep;
pub mod terms;

pub use error::{RetrievalError, RetrievalResult};
pub use orchestrator::{RetrievalOrchestrator, RetrievalOutcome, SearchStrategy};
