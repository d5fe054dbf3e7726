use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::collections::BTreeSet;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use kb_rag::chat::ChatClient;
use kb_rag::config::Config;
use kb_rag::embeddings::{Embedder, EmbeddingClient};
use kb_rag::knowledge_base::{self, KnowledgeBase, DEFAULT_EXTENSION};
use kb_rag::rag::{RagEngine, DEFAULT_TOP_K};
use kb_rag::RagError;

const DEFAULT_PERSIST_DIR: &str = "./kb_store";

/// Local knowledge base question answering over your own text files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the knowledge base from a directory of text files
    Build {
        /// Directory containing the source files
        #[arg(short = 'k', long)]
        kb_dir: PathBuf,
        /// Where to persist the vector store
        #[arg(short, long, default_value = DEFAULT_PERSIST_DIR)]
        persist_dir: PathBuf,
        /// Extension of the files to read
        #[arg(short, long, default_value = DEFAULT_EXTENSION)]
        extension: String,
        /// Chat API key (falls back to DEEPSEEK_API_KEY)
        #[arg(short = 'a', long)]
        api_key: Option<String>,
    },
    /// Interactive chat with the knowledge base
    Chat {
        #[arg(short, long, default_value = DEFAULT_PERSIST_DIR)]
        persist_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Ask a single question
    Ask {
        question: String,
        /// Only print the answer, without sources
        #[arg(short, long)]
        answer_only: bool,
        #[arg(short, long, default_value = DEFAULT_PERSIST_DIR)]
        persist_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Build {
            kb_dir,
            persist_dir,
            extension,
            api_key,
        } => {
            let config = load_config(api_key)?;
            build(config, &kb_dir, &persist_dir, &extension).await
        }
        Command::Chat { persist_dir, top_k } => {
            let engine = open_engine(load_config(None)?, &persist_dir).await?;
            run_chat_loop(&engine, top_k).await
        }
        Command::Ask {
            question,
            answer_only,
            persist_dir,
            top_k,
        } => {
            let engine = open_engine(load_config(None)?, &persist_dir).await?;
            let answer = engine
                .answer(&question, top_k)
                .await
                .context("Failed to answer question")?;
            let sources = if answer_only {
                None
            } else {
                Some(&answer.sources)
            };
            print_answer(&answer.text, sources);
            Ok(())
        }
    }
}

/// Load and validate configuration once; `api_key` overrides the chat key
fn load_config(api_key: Option<String>) -> Result<Config> {
    let config = Config::from_lookup(|key| match (key, &api_key) {
        ("DEEPSEEK_API_KEY", Some(override_key)) => Some(override_key.clone()),
        _ => env::var(key).ok(),
    })?;
    Ok(config)
}

async fn build(config: Config, kb_dir: &Path, persist_dir: &Path, extension: &str) -> Result<()> {
    info!("Building knowledge base from {}", kb_dir.display());

    let embedder =
        EmbeddingClient::new(config.embedding.clone()).context("Failed to create embedding client")?;
    let knowledge_base = KnowledgeBase::new(kb_dir, persist_dir, config.chunking, embedder)?
        .with_extension(extension);

    let store = knowledge_base
        .build_knowledge_base()
        .await
        .context("Failed to build knowledge base")?;

    println!("Knowledge base built successfully!");
    println!("Vector store saved at: {}", persist_dir.display());
    println!("Chunks stored: {}", store.len());
    Ok(())
}

async fn open_engine(config: Config, persist_dir: &Path) -> Result<RagEngine<EmbeddingClient>> {
    let store = match knowledge_base::load_vector_store(persist_dir).await {
        Ok(store) => store,
        Err(e @ RagError::StoreNotBuilt(_)) => {
            error!("{}", e);
            return Err(anyhow::Error::new(e)
                .context("Make sure you have built the knowledge base first using the 'build' command"));
        }
        Err(e) => return Err(e.into()),
    };

    let embedder = EmbeddingClient::new(config.embedding)?;
    let chat = ChatClient::new(config.chat)?;
    Ok(RagEngine::new(store, embedder, chat))
}

async fn run_chat_loop<E: Embedder>(engine: &RagEngine<E>, top_k: usize) -> Result<()> {
    println!("\nKnowledge Base is ready!");
    println!("Type 'exit' or 'quit' to end the chat.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("You: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();

        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "q") {
            println!("\nGoodbye!");
            break;
        }
        if question.is_empty() {
            continue;
        }

        match engine.answer(question, top_k).await {
            Ok(answer) => print_answer(&answer.text, Some(&answer.sources)),
            Err(e) => {
                error!("Failed to answer question: {}", e);
                println!("Error: {}", e);
            }
        }
        println!();
    }

    Ok(())
}

fn print_answer(text: &str, sources: Option<&BTreeSet<String>>) {
    println!("\nAI: {}", text);

    if let Some(sources) = sources.filter(|s| !s.is_empty()) {
        println!("\nSources:");
        for source in sources {
            let name = Path::new(source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.clone());
            println!("  - {}", name);
        }
    }
}
