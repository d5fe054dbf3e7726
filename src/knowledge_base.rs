//! Build and load entry points for the command line layer.
//!
//! A build reads every matching file, splits it into chunks, embeds the
//! chunks and replaces the persisted store in one go.

use crate::chat::ChatClient;
use crate::chunking::{Chunk, TextSplitter};
use crate::config::{ChunkingConfig, Config};
use crate::database::{VectorStore, VectorStoreEntry};
use crate::document::{self, Document};
use crate::embeddings::{is_embeddable, Embedder, EmbeddingClient};
use crate::error::{RagError, RemoteErrorKind, Result, Service};
use crate::rag::{RagEngine, Reply};
use log::info;
use std::path::{Path, PathBuf};

/// File extension read when none is given
pub const DEFAULT_EXTENSION: &str = "md";

pub struct KnowledgeBase<E: Embedder> {
    kb_dir: PathBuf,
    persist_dir: PathBuf,
    extension: String,
    splitter: TextSplitter,
    embedder: E,
}

impl<E: Embedder> KnowledgeBase<E> {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        kb_dir: P,
        persist_dir: Q,
        chunking: ChunkingConfig,
        embedder: E,
    ) -> Result<Self> {
        Ok(KnowledgeBase {
            kb_dir: kb_dir.as_ref().to_path_buf(),
            persist_dir: persist_dir.as_ref().to_path_buf(),
            extension: DEFAULT_EXTENSION.to_string(),
            splitter: TextSplitter::new(chunking)?,
            embedder,
        })
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn load_documents(&self) -> Result<Vec<Document>> {
        document::load_documents(&self.kb_dir, &self.extension)
    }

    /// Split documents into chunks
    pub fn process_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        self.splitter.split_documents(documents)
    }

    /// Embed `chunks` and replace the persisted store with them.
    ///
    /// Embedding errors abort before anything is written.
    pub async fn create_vector_store(&self, chunks: Vec<Chunk>) -> Result<VectorStore> {
        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .filter(|chunk| is_embeddable(&chunk.content))
            .collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::remote(
                Service::Embedding,
                RemoteErrorKind::MalformedResponse,
                format!(
                    "got {} embeddings for {} chunks",
                    embeddings.len(),
                    chunks.len()
                ),
            ));
        }

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, vector)| VectorStoreEntry { chunk, vector })
            .collect();

        VectorStore::rebuild(entries, self.embedder.dimension(), &self.persist_dir).await
    }

    /// Complete pipeline to build the knowledge base
    pub async fn build_knowledge_base(&self) -> Result<VectorStore> {
        info!("Loading documents...");
        let documents = self.load_documents()?;
        if documents.is_empty() {
            return Err(RagError::NoDocuments {
                dir: self.kb_dir.clone(),
                extension: self.extension.trim_start_matches('.').to_string(),
            });
        }
        info!("Loaded {} documents", documents.len());

        info!("Processing documents...");
        let chunks = self.process_documents(&documents);
        info!("Created {} document chunks", chunks.len());

        info!("Creating vector store...");
        let store = self.create_vector_store(chunks).await?;
        info!(
            "Knowledge base built successfully! Vector store persisted at {}",
            self.persist_dir.display()
        );
        Ok(store)
    }

    pub async fn load_vector_store(&self) -> Result<VectorStore> {
        load_vector_store(&self.persist_dir).await
    }
}

/// Build the store at `persist_dir` from the `.md` files in `kb_dir`
pub async fn build_knowledge_base<P: AsRef<Path>, Q: AsRef<Path>>(
    config: &Config,
    kb_dir: P,
    persist_dir: Q,
) -> Result<VectorStore> {
    let embedder = EmbeddingClient::new(config.embedding.clone())?;
    KnowledgeBase::new(kb_dir, persist_dir, config.chunking.clone(), embedder)?
        .build_knowledge_base()
        .await
}

/// Open a previously built store
pub async fn load_vector_store<P: AsRef<Path>>(persist_dir: P) -> Result<VectorStore> {
    let store = VectorStore::open(persist_dir).await?;
    info!(
        "Loaded knowledge base with {} chunks from {}",
        store.len(),
        store.path().display()
    );
    Ok(store)
}

/// Answer one question against `store`
pub async fn ask_question(
    config: &Config,
    store: VectorStore,
    question: &str,
    answer_only: bool,
) -> Result<Reply> {
    let engine = RagEngine::new(
        store,
        EmbeddingClient::new(config.embedding.clone())?,
        ChatClient::new(config.chat.clone())?,
    );
    engine.ask_question(question, answer_only).await
}
