use clap::{Parser, Subcommand};
use fieldhub_chunk::ChunkingConfig;
use fieldhub_embed::{EmbedConfig, EmbeddingProvider, create_provider};
use fieldhub_kb::index::{
    CancelToken, Indexer, IndexerConfig, KnowledgeSource, SearchIndex,
};
use fieldhub_kb::search::{Retriever, SearchOptions};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Operator CLI for the fieldhub knowledge-base index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory containing the .fieldhub-kb.db database file
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Embedding provider: hash | fastembed
    #[arg(long, default_value = "hash")]
    embedding: String,

    /// Vector dimension for the hash provider
    #[arg(long, default_value_t = 384)]
    dimension: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the knowledge-base database
    Init,
    /// Register or update a knowledge source from a text file
    AddSource {
        /// Source identifier
        id: String,
        /// Source title
        #[arg(long)]
        title: String,
        /// File containing the source text
        #[arg(long)]
        file: PathBuf,
        /// Source type: manual | procedure | policy
        #[arg(long, default_value = "manual")]
        source_type: String,
        /// Topical category
        #[arg(long, default_value = "general")]
        category: String,
        /// Sensitivity: public | internal
        #[arg(long, default_value = "public")]
        sensitivity: String,
        /// Register the source as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Index every active source that is not indexed yet
    IndexAll {
        /// Chunk size in words
        #[arg(long, default_value_t = 200)]
        chunk_size: usize,
        /// Chunk overlap in words
        #[arg(long, default_value_t = 40)]
        chunk_overlap: usize,
    },
    /// Delete and rebuild one source's chunks
    Reindex {
        /// Source identifier
        id: String,
        #[arg(long, default_value_t = 200)]
        chunk_size: usize,
        #[arg(long, default_value_t = 40)]
        chunk_overlap: usize,
    },
    /// Search the indexed corpus
    Search {
        /// Query text
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        /// Minimum similarity threshold (0.0 to 1.0)
        #[arg(short, long, default_value_t = 0.7)]
        threshold: f32,
        /// Restrict to one source type
        #[arg(long)]
        source_type: Option<String>,
        /// Include internal content in the results
        #[arg(long)]
        include_internal: bool,
        /// Output format: summary | json
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show the indexing status of one source
    Status {
        /// Source identifier
        id: String,
    },
    /// Show index statistics
    Stats {
        /// Output format: summary | json
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct SearchOutput {
    source_id: String,
    ordinal: usize,
    title: String,
    source_type: String,
    category: String,
    score: f32,
    text: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn provider_from_args(args: &Args) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let config = match args.embedding.as_str() {
        "hash" => EmbedConfig::hash(args.dimension),
        "fastembed" => EmbedConfig::fastembed(),
        other => anyhow::bail!("unknown embedding provider: {other}"),
    };
    Ok(create_provider(&config).await?)
}

async fn indexer_for(
    args: &Args,
    index: &SearchIndex,
    chunk_size: usize,
    chunk_overlap: usize,
) -> anyhow::Result<Indexer> {
    let provider = provider_from_args(args).await?;
    let config = IndexerConfig::new(ChunkingConfig::new(chunk_size, chunk_overlap)?);
    Ok(Indexer::new(
        Arc::new(index.clone()),
        index.clone(),
        provider,
        config,
    )
    .await?)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let index = SearchIndex::open(&args.base_dir).await?;

    match &args.command {
        Commands::Init => {
            println!(
                "Initialized knowledge-base database at {}/.fieldhub-kb.db",
                args.base_dir.display()
            );
            Ok(())
        }
        Commands::AddSource {
            id,
            title,
            file,
            source_type,
            category,
            sensitivity,
            inactive,
        } => {
            let content = tokio::fs::read_to_string(file).await?;
            let source = KnowledgeSource {
                id: id.clone(),
                title: title.clone(),
                content,
                source_type: source_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                category: category.clone(),
                sensitivity: sensitivity.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                active: !inactive,
            };
            index.upsert_source(&source).await?;
            println!("Registered source {id} ({title})");
            Ok(())
        }
        Commands::IndexAll {
            chunk_size,
            chunk_overlap,
        } => {
            let indexer = indexer_for(&args, &index, *chunk_size, *chunk_overlap).await?;

            let cancel = CancelToken::new();
            let cancel_on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel_on_signal.cancel();
                }
            });

            let report = indexer.index_all_pending(&cancel).await?;
            println!(
                "Indexed {} sources ({} chunks), skipped {}, {} failures{}",
                report.sources_indexed,
                report.chunks_created,
                report.sources_skipped,
                report.failures.len(),
                if report.cancelled { " (cancelled)" } else { "" },
            );
            for failure in &report.failures {
                println!("  failed {}: {}", failure.source_id, failure.message);
            }
            Ok(())
        }
        Commands::Reindex {
            id,
            chunk_size,
            chunk_overlap,
        } => {
            let indexer = indexer_for(&args, &index, *chunk_size, *chunk_overlap).await?;
            let chunks = indexer.reindex_document(id).await?;
            println!("Reindexed {id}: {chunks} chunks");
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            threshold,
            source_type,
            include_internal,
            format,
        } => {
            let provider = provider_from_args(&args).await?;
            let retriever = Retriever::new(index, provider);

            let mut options = SearchOptions::default()
                .with_limit(*limit)
                .with_threshold(*threshold);
            if let Some(source_type) = source_type {
                options = options
                    .with_source_type(source_type.parse().map_err(|e: String| anyhow::anyhow!(e))?);
            }
            if *include_internal {
                options = options.with_sensitivity(fieldhub_kb::index::Sensitivity::Internal);
            }

            let results = retriever.search(query, &options).await?;
            let outputs: Vec<SearchOutput> = results
                .into_iter()
                .map(|result| SearchOutput {
                    source_id: result.chunk.source_id,
                    ordinal: result.chunk.ordinal,
                    title: result.chunk.title,
                    source_type: result.chunk.source_type.as_str().to_string(),
                    category: result.chunk.category,
                    score: result.score,
                    text: result.chunk.text,
                })
                .collect();

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&outputs)?);
                }
                OutputFormat::Summary => {
                    if outputs.is_empty() {
                        println!("No results above threshold {threshold}");
                    }
                    for output in &outputs {
                        println!(
                            "[{:.3}] {} #{} ({}, {})",
                            output.score,
                            output.title,
                            output.ordinal,
                            output.source_type,
                            output.category,
                        );
                        println!("    {}", truncate(&output.text, 160));
                    }
                }
            }
            Ok(())
        }
        Commands::Status { id } => {
            match index.indexing_status(id).await? {
                Some(status) => {
                    println!("state: {}", status.state.as_str());
                    if let Some(ordinal) = status.failed_ordinal {
                        println!("failed at chunk: {ordinal}");
                    }
                    if let Some(error) = &status.error {
                        println!("error: {error}");
                    }
                    println!("updated: {}", status.updated_at);
                }
                None => println!("state: not_indexed"),
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let stats = index.stats().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary => {
                    println!("Sources:         {}", stats.sources_count);
                    println!("  indexed:       {}", stats.indexed_sources_count);
                    println!("Chunks:          {}", stats.chunks_count);
                    println!("Embedding models: {}", stats.models_count);
                }
            }
            Ok(())
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
