//! Property tests for the retrieval core invariants.

mod cache_properties;
mod fusion_properties;
mod retrieval_properties;
