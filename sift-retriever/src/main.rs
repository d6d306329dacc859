use clap::{Parser, Subcommand};
use serde::Serialize;
use sift_embed::HttpEmbeddingProvider;
use sift_retriever::{
    config::SiftConfig,
    llm::OpenAiChatBackend,
    retrieval::{
        HybridSearchEngine, HybridSearchOptions, IncrementalIndexer, LlmChunkKeywordGenerator,
        LlmKeywordRanker, QueryKeywordExtractor, ReconcileOptions, SearchResult,
    },
    storage::{Chunk, ChunkFilter, ChunkStore, sqlite_store::SqliteStore},
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A CLI tool to search and maintain a sift chunk database.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the chunk database
    Init,
    /// List chunks in the database
    List {
        /// Only list chunks of this collection
        #[arg(long)]
        collection: Option<String>,
        /// Limit number of results
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show database statistics
    Stats {
        /// Only count chunks of this collection
        #[arg(long)]
        collection: Option<String>,
    },
    /// Run a hybrid search
    Search {
        /// Query text
        query: String,
        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        /// Only search this collection
        #[arg(long)]
        collection: Option<String>,
        /// Show each tier's results as well as the fused list
        #[arg(short, long)]
        verbose: bool,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Reconcile a collection with chunks read from a JSON file
    Reconcile {
        /// Collection to reconcile
        collection: String,
        /// JSON file holding an array of chunks
        chunks: PathBuf,
        /// Regenerate keywords for unchanged chunks too
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct ChunkOutput<'a> {
    id: &'a str,
    collection_id: &'a str,
    document_id: &'a str,
    title: &'a str,
    keywords: &'a [String],
    content: &'a str,
    has_embedding: bool,
}

impl<'a> From<&'a Chunk> for ChunkOutput<'a> {
    fn from(chunk: &'a Chunk) -> Self {
        Self {
            id: &chunk.id,
            collection_id: &chunk.metadata.collection_id,
            document_id: &chunk.metadata.document_id,
            title: &chunk.metadata.title,
            keywords: &chunk.keywords,
            content: &chunk.content,
            has_embedding: chunk.embedding.is_some(),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SiftConfig::load(path)?,
        None => SiftConfig::default().with_env_overrides(),
    };
    if let Some(database) = args.database {
        config = config.with_database_path(database);
    }

    match args.command {
        Commands::Init => {
            SqliteStore::open(&config.database_path).await?;
            println!(
                "Initialized chunk database at {}",
                config.database_path.display()
            );
            Ok(())
        }
        Commands::List {
            collection,
            limit,
            format,
        } => {
            let store = SqliteStore::open(&config.database_path).await?;
            let mut chunks = store
                .list_chunks(ChunkFilter {
                    collection_id: collection,
                })
                .await?;
            chunks.truncate(limit);

            match format {
                OutputFormat::Json => {
                    let output: Vec<ChunkOutput> = chunks.iter().map(ChunkOutput::from).collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} chunks:", chunks.len());
                    for chunk in &chunks {
                        println!(
                            "  ID: {} | Collection: {} | Document: {} | Keywords: {} | Embedding: {}",
                            chunk.id,
                            chunk.metadata.collection_id,
                            chunk.metadata.document_id,
                            chunk.keywords.len(),
                            if chunk.embedding.is_some() { "✓" } else { "✗" }
                        );
                    }
                }
                OutputFormat::Full => {
                    for chunk in &chunks {
                        print_chunk(chunk);
                        println!("---");
                    }
                }
            }
            Ok(())
        }
        Commands::Stats { collection } => {
            let store = SqliteStore::open(&config.database_path).await?;
            let stats = store
                .count_chunks(ChunkFilter {
                    collection_id: collection,
                })
                .await?;

            println!("Database Statistics:");
            println!("  Total chunks: {}", stats.total_chunks);
            println!("  Chunks with embeddings: {}", stats.chunks_with_embeddings);
            println!("  Chunks with keywords: {}", stats.chunks_with_keywords);
            println!("  Documents: {}", stats.documents);
            println!("  Collections: {}", stats.collections);
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            collection,
            verbose,
            format,
        } => {
            let store = Arc::new(SqliteStore::open(&config.database_path).await?);
            let embedder = Arc::new(HttpEmbeddingProvider::new(config.embedding.clone())?);
            let llm = Arc::new(OpenAiChatBackend::new(config.llm.clone())?);
            let engine = HybridSearchEngine::new(
                store,
                embedder,
                QueryKeywordExtractor::new(llm.clone()),
                Arc::new(LlmKeywordRanker::new(llm)),
                config.search.clone(),
            );

            let options = HybridSearchOptions {
                collection_filter: collection,
                verbose,
            };
            let response = engine.hybrid_search(&query, top_k, options).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    if let Some(breakdown) = &response.breakdown {
                        println!(
                            "Query terms ({:?}): {}",
                            breakdown.term_source,
                            breakdown.query_terms.join(", ")
                        );
                        println!(
                            "Keyword tier: {:?} over {} chunks",
                            breakdown.keyword_status, breakdown.corpus_size
                        );
                        print_results("Vector tier", &breakdown.vector_results, false);
                        print_results("Keyword tier", &breakdown.keyword_results, false);
                    }
                    print_results(
                        "Results",
                        &response.results,
                        format == OutputFormat::Full,
                    );
                }
            }
            Ok(())
        }
        Commands::Reconcile {
            collection,
            chunks,
            force,
        } => {
            let text = tokio::fs::read_to_string(&chunks)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", chunks.display(), e))?;
            let fresh: Vec<Chunk> = serde_json::from_str(&text)
                .map_err(|e| anyhow::anyhow!("Invalid chunk file {}: {}", chunks.display(), e))?;

            let store = Arc::new(SqliteStore::open(&config.database_path).await?);
            let embedder = Arc::new(HttpEmbeddingProvider::new(config.embedding.clone())?);
            let llm = Arc::new(OpenAiChatBackend::new(config.llm.clone())?);
            let indexer = IncrementalIndexer::new(
                store,
                embedder,
                Some(Arc::new(LlmChunkKeywordGenerator::new(llm))),
                config.indexer.clone(),
            );

            let stats = indexer
                .reconcile(&collection, fresh, ReconcileOptions { force })
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

fn print_results(heading: &str, results: &[SearchResult], full: bool) {
    println!("{heading} ({}):", results.len());
    for (rank, result) in results.iter().enumerate() {
        println!(
            "  {:>2}. {:.4} | ID: {} | Title: {} | Method: {}",
            rank + 1,
            result.score,
            result.chunk.id,
            result.chunk.metadata.title,
            result.method
        );
        if full {
            println!("{}", result.chunk.content);
            println!("---");
        }
    }
}

fn print_chunk(chunk: &Chunk) {
    println!("Chunk ID: {}", chunk.id);
    println!("Collection: {}", chunk.metadata.collection_id);
    println!(
        "Document: {} ({})",
        chunk.metadata.document_id, chunk.metadata.title
    );
    println!("Hash: {}", chunk.metadata.hash);
    println!("Keywords: {}", chunk.keywords.join(", "));
    println!(
        "Has Embedding: {}",
        if chunk.embedding.is_some() { "Yes" } else { "No" }
    );
    println!("Content:\n{}", chunk.content);
}
