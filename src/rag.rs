use crate::chat::ChatClient;
use crate::database::{SearchHit, VectorStore};
use crate::embeddings::Embedder;
use crate::error::Result;
use log::{debug, info};
use std::collections::BTreeSet;

/// Number of chunks retrieved per question
pub const DEFAULT_TOP_K: usize = 3;

/// What the model is told to say when the context does not cover the question
pub const INSUFFICIENT_CONTEXT_REPLY: &str =
    "I don't have enough information to answer that question.";

/// Build the grounded single-turn prompt
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant that answers questions based on the provided context.\n\n\
         Context:\n{context}\n\n\
         Question:\n{question}\n\n\
         Instructions:\n\
         - Answer strictly based on the context provided\n\
         - If the answer is not found in the context, say \"{INSUFFICIENT_CONTEXT_REPLY}\"\n\
         - Be clear and concise in your response\n\
         - Use bullet points if multiple items need to be listed\n\n\
         Answer:\n"
    )
}

/// An answer and the documents its context came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub sources: BTreeSet<String>,
}

/// Result of `ask_question`; `TextOnly` when sources were not requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Full(Answer),
    TextOnly(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Full(answer) => &answer.text,
            Reply::TextOnly(text) => text,
        }
    }

    pub fn sources(&self) -> Option<&BTreeSet<String>> {
        match self {
            Reply::Full(answer) => Some(&answer.sources),
            Reply::TextOnly(_) => None,
        }
    }
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine<E: Embedder> {
    store: VectorStore,
    embedder: E,
    chat: ChatClient,
}

impl<E: Embedder> RagEngine<E> {
    /// Create a new RAG engine
    pub fn new(store: VectorStore, embedder: E, chat: ChatClient) -> Self {
        RagEngine {
            store,
            embedder,
            chat,
        }
    }

    /// Top-`k` chunks for `question`. A blank question searches with the
    /// zero vector; embedding service failures are returned.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query = self.embedder.try_embed_query(question).await?;
        let hits = self.store.similarity_search(&query, k).await?;
        debug!("Retrieved {} chunks for question", hits.len());
        Ok(hits)
    }

    pub async fn answer(&self, question: &str, k: usize) -> Result<Answer> {
        let hits = self.retrieve(question, k).await?;

        let sources: BTreeSet<String> = hits
            .iter()
            .map(|hit| hit.entry.chunk.metadata.source.clone())
            .collect();

        // Create context from chunks
        let context = hits
            .iter()
            .map(|hit| hit.entry.chunk.content.as_str())
            .collect::<Vec<&str>>()
            .join("\n\n");

        if context.trim().is_empty() {
            info!("No relevant information found in the knowledge base.");
            return Ok(Answer {
                text: INSUFFICIENT_CONTEXT_REPLY.to_string(),
                sources: BTreeSet::new(),
            });
        }

        let text = self.chat.complete(&build_prompt(&context, question)).await?;
        Ok(Answer { text, sources })
    }

    pub async fn ask_question(&self, question: &str, answer_only: bool) -> Result<Reply> {
        let answer = self.answer(question, DEFAULT_TOP_K).await?;
        if answer_only {
            Ok(Reply::TextOnly(answer.text))
        } else {
            Ok(Reply::Full(answer))
        }
    }
}
