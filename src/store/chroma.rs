//! [`VectorStore`] backed by a Chroma server (v2 REST API).
//!
//! All chunks live in one collection; each chunk's metadata carries its
//! `file_id`, and every read and delete is scoped with a `where` filter on
//! that field. The collection is created with cosine space so that the
//! distances Chroma returns are `1 - cosine similarity`, the same scale as
//! the in-memory indexes.
//!
//! Endpoints (relative to `{url}/api/v2/tenants/{tenant}/databases/{database}/collections`):
//!
//! | Call | Endpoint |
//! |------|----------|
//! | resolve collection | `GET /{name}`, `POST /` on 404 |
//! | upsert | `POST /{id}/upsert` |
//! | similarity query | `POST /{id}/query` |
//! | keyword scan / warm load | `POST /{id}/get` |
//! | delete file | `POST /{id}/delete` |

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::VectorStore;
use crate::config::StoreConfig;
use crate::fusion;
use crate::models::{ChunkEmbedding, ChunkResult, Metadata, FILE_ID};

pub struct ChromaStore {
    collections_url: String,
    collection: String,
    client: reqwest::Client,
    collection_id: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

/// `query` responses are nested one level per query embedding.
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Default, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Metadata>>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f64>>>,
}

fn first_batch<T>(nested: Option<Vec<Vec<T>>>) -> Option<Vec<T>> {
    nested.and_then(|batches| batches.into_iter().next())
}

impl QueryResponse {
    fn into_results(self) -> Vec<ChunkResult> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let documents = first_batch(self.documents).unwrap_or_default();
        let metadatas = first_batch(self.metadatas).unwrap_or_default();
        let distances = first_batch(self.distances).unwrap_or_default();

        ids.into_iter()
            .enumerate()
            .map(|(i, id)| ChunkResult {
                id,
                text: documents.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
                distance: distances.get(i).copied().flatten().unwrap_or(1.0),
            })
            .collect()
    }
}

impl GetResponse {
    fn into_embeddings(self) -> Vec<ChunkEmbedding> {
        let documents = self.documents.unwrap_or_default();
        let metadatas = self.metadatas.unwrap_or_default();
        let embeddings = self.embeddings.unwrap_or_default();

        self.ids
            .into_iter()
            .enumerate()
            .map(|(i, chunk_id)| ChunkEmbedding {
                chunk_id,
                vector: embeddings.get(i).cloned().unwrap_or_default(),
                text: documents.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
            })
            .collect()
    }
}

impl ChromaStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            collections_url: format!(
                "{}/api/v2/tenants/{}/databases/{}/collections",
                config.url.trim_end_matches('/'),
                config.tenant,
                config.database
            ),
            collection: config.collection.clone(),
            client,
            collection_id: OnceCell::new(),
        })
    }

    /// Resolve the collection id once per store, creating the collection
    /// on first use.
    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| self.get_or_create_collection())
            .await?;
        Ok(id.as_str())
    }

    async fn get_or_create_collection(&self) -> Result<String> {
        let url = format!("{}/{}", self.collections_url, self.collection);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Chroma connection error ({})", url))?;

        if response.status().is_success() {
            let collection: CollectionResponse = response.json().await?;
            return Ok(collection.id);
        }
        if response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Chroma get collection error {}: {}", status, body);
        }

        tracing::info!(collection = %self.collection, "creating Chroma collection");
        let collection: CollectionResponse = self
            .post(
                &self.collections_url,
                "create collection",
                &json!({
                    "name": self.collection,
                    "metadata": { "hnsw:space": "cosine" },
                    "get_or_create": true,
                }),
            )
            .await?;
        Ok(collection.id)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Chroma connection error during {}", operation))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Chroma {} error {}: {}", operation, status, body);
        }

        // upsert and delete may answer with an empty body
        let bytes = response.bytes().await?;
        let payload = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null".as_slice()
        } else {
            bytes.as_ref()
        };
        serde_json::from_slice(payload)
            .map_err(|e| anyhow!("Chroma {} returned an unexpected body: {}", operation, e))
    }

    async fn get_where(&self, file_id: &str, with_embeddings: bool) -> Result<GetResponse> {
        let id = self.collection_id().await?;
        let mut include = vec!["documents", "metadatas"];
        if with_embeddings {
            include.push("embeddings");
        }
        self.post(
            &format!("{}/{}/get", self.collections_url, id),
            "get",
            &json!({ "where": { FILE_ID: file_id }, "include": include }),
        )
        .await
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn query_similar(
        &self,
        vector: &[f64],
        file_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkResult>> {
        let id = self.collection_id().await?;
        let response: QueryResponse = self
            .post(
                &format!("{}/{}/query", self.collections_url, id),
                "query",
                &json!({
                    "query_embeddings": [vector],
                    "n_results": top_k,
                    "where": { FILE_ID: file_id },
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;
        Ok(response.into_results())
    }

    async fn keyword_search(
        &self,
        keywords: &[String],
        file_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkResult>> {
        let chunks = self.get_where(file_id, false).await?.into_embeddings();
        let candidates = chunks
            .iter()
            .map(|c| (c.chunk_id.as_str(), c.text.as_str(), &c.metadata));
        Ok(fusion::keyword_search(candidates, keywords, top_k))
    }

    async fn get_file_chunks(&self, file_id: &str) -> Result<Vec<ChunkEmbedding>> {
        Ok(self.get_where(file_id, true).await?.into_embeddings())
    }

    async fn upsert(&self, file_id: &str, chunks: &[ChunkEmbedding]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;

        let mut ids = Vec::with_capacity(chunks.len());
        let mut embeddings = Vec::with_capacity(chunks.len());
        let mut documents = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut metadata = chunk.metadata.clone();
            metadata.insert(FILE_ID.into(), file_id.into());
            ids.push(chunk.chunk_id.as_str());
            embeddings.push(chunk.vector.as_slice());
            documents.push(chunk.text.as_str());
            metadatas.push(metadata);
        }

        let _: serde_json::Value = self
            .post(
                &format!("{}/{}/upsert", self.collections_url, id),
                "upsert",
                &json!({
                    "ids": ids,
                    "embeddings": embeddings,
                    "documents": documents,
                    "metadatas": metadatas,
                }),
            )
            .await?;
        tracing::debug!(file_id, chunks = chunks.len(), "upserted chunks into Chroma");
        Ok(())
    }

    async fn delete_chunks(&self, file_id: &str, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;
        let _: serde_json::Value = self
            .post(
                &format!("{}/{}/delete", self.collections_url, id),
                "delete",
                &json!({ "ids": chunk_ids, "where": { FILE_ID: file_id } }),
            )
            .await?;
        tracing::debug!(file_id, chunks = chunk_ids.len(), "deleted stale chunks from Chroma");
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let id = self.collection_id().await?;
        let _: serde_json::Value = self
            .post(
                &format!("{}/{}/delete", self.collections_url, id),
                "delete",
                &json!({ "where": { FILE_ID: file_id } }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collections_url() {
        let store = ChromaStore::new(&StoreConfig {
            url: "http://chroma:8000/".into(),
            ..StoreConfig::default()
        })
        .unwrap();
        assert_eq!(
            store.collections_url,
            "http://chroma:8000/api/v2/tenants/default_tenant/databases/default_database/collections"
        );
    }

    #[test]
    fn test_query_response_parsing() {
        let response: QueryResponse = serde_json::from_value(json!({
            "ids": [["f_0", "f_1"]],
            "documents": [["first", null]],
            "metadatas": [[{"chunk_type": "list", "file_id": "f"}, null]],
            "distances": [[0.1, 0.4]],
        }))
        .unwrap();

        let results = response.into_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "f_0");
        assert_eq!(results[0].text, "first");
        assert_eq!(results[0].chunk_type(), Some("list"));
        assert!((results[0].distance - 0.1).abs() < 1e-12);
        assert_eq!(results[1].text, "");
        assert!(results[1].metadata.is_empty());
    }

    #[test]
    fn test_empty_query_response() {
        let response: QueryResponse = serde_json::from_value(json!({ "ids": [] })).unwrap();
        assert!(response.into_results().is_empty());
    }

    #[test]
    fn test_get_response_parsing() {
        let response: GetResponse = serde_json::from_value(json!({
            "ids": ["f_0"],
            "documents": ["text"],
            "metadatas": [{"file_id": "f"}],
            "embeddings": [[0.5, 0.5]],
        }))
        .unwrap();

        let chunks = response.into_embeddings();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "f_0");
        assert_eq!(chunks[0].vector, vec![0.5, 0.5]);
        assert_eq!(chunks[0].text, "text");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let store = ChromaStore::new(&StoreConfig {
            url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..StoreConfig::default()
        })
        .unwrap();
        let err = store.query_similar(&[1.0], "f", 3).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Chroma"));
    }
}
