pub mod chat;
pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod knowledge_base;
pub mod rag;

pub use error::{RagError, Result};
pub use knowledge_base::{ask_question, build_knowledge_base, load_vector_store};
