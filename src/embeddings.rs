use crate::config::EmbeddingConfig;
use crate::error::{RagError, RemoteErrorKind, Result, Service};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Upper bound on texts per embedding request
pub const EMBEDDING_BATCH_SIZE: usize = 10;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn zeros(dimension: usize) -> Self {
        Embedding {
            values: vec![0.0; dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding { values }
    }
}

/// Whether `embed_batch` sends this text. Callers pairing results with
/// their inputs must filter with the same predicate.
pub fn is_embeddable(text: &str) -> bool {
    !text.is_empty()
}

/// A provider of fixed-dimension text embeddings
#[allow(async_fn_in_trait)]
pub trait Embedder {
    fn dimension(&self) -> usize;

    /// Embed every embeddable text, in input order.
    ///
    /// Any failure aborts the whole call; vectors from batches that had
    /// already succeeded are dropped.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a query. Blank text maps to the zero vector without a
    /// network call; remote failures are returned.
    async fn try_embed_query(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            debug!("Blank query, using zero vector");
            return Ok(Embedding::zeros(self.dimension()));
        }

        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings.pop().ok_or_else(|| {
            RagError::remote(
                Service::Embedding,
                RemoteErrorKind::MalformedResponse,
                "no embedding returned for query",
            )
        })
    }

    /// Embed a query, substituting the zero vector for blank text or any
    /// failure. Never use this for document chunks.
    async fn embed_query(&self, text: &str) -> Embedding {
        match self.try_embed_query(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Query embedding failed, falling back to zero vector: {}", e);
                Embedding::zeros(self.dimension())
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    encoding_format: &'static str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for an OpenAI-compatible embeddings endpoint
#[derive(Clone)]
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(EmbeddingClient { config, client })
    }

    async fn request_batch(&self, batch: &[&str]) -> Result<Vec<Embedding>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: batch,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::from_reqwest(Service::Embedding, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::from_reqwest(Service::Embedding, e))?;

        if !status.is_success() {
            return Err(RagError::remote(
                Service::Embedding,
                RemoteErrorKind::Status(status.as_u16()),
                body,
            ));
        }

        let mut response_data: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::remote(
                Service::Embedding,
                RemoteErrorKind::MalformedResponse,
                e.to_string(),
            )
        })?;

        if response_data.data.len() != batch.len() {
            return Err(RagError::remote(
                Service::Embedding,
                RemoteErrorKind::MalformedResponse,
                format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response_data.data.len()
                ),
            ));
        }

        if response_data.data.iter().all(|d| d.index.is_some()) {
            response_data.data.sort_by_key(|d| d.index);
        }

        response_data
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.config.dimension {
                    return Err(RagError::remote(
                        Service::Embedding,
                        RemoteErrorKind::MalformedResponse,
                        format!(
                            "expected dimension {}, got {}",
                            self.config.dimension,
                            d.embedding.len()
                        ),
                    ));
                }
                Ok(Embedding::from(d.embedding))
            })
            .collect()
    }
}

impl Embedder for EmbeddingClient {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(String::as_str)
            .filter(|text| is_embeddable(text))
            .collect();

        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let total = inputs.len().div_ceil(EMBEDDING_BATCH_SIZE);
        let mut embeddings = Vec::with_capacity(inputs.len());

        for (i, batch) in inputs.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
            debug!(
                "Sending batch {}/{} ({} texts) to {}",
                i + 1,
                total,
                batch.len(),
                self.config.endpoint
            );
            let batch_embeddings = self.request_batch(batch).await.map_err(|e| {
                debug!("Batch {}/{} failed: {}", i + 1, total, e);
                e
            })?;
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }
}
