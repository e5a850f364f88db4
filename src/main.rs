use nlq_engine::backend::HttpBackend;
use nlq_engine::knowledge::{KnowledgeExport, KnowledgeSearch, KnowledgeStore, SqliteKnowledgeStore};
use nlq_engine::llm::OpenAiCompletionClient;
use nlq_engine::safety_guardrails::{SafetyValidator, ValidationContext};
use nlq_engine::semantic::{FeatureExtractor, QuestionAnalysis};
use nlq_engine::{AnswerRequest, Dialect, EngineConfig, SelfCorrectionEngine};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Answer natural-language questions with self-correcting SQL and DAX queries")]
#[command(version)]
struct Args {
    /// Knowledge database path (or set NLQ_KNOWLEDGE_DB)
    #[arg(long, global = true)]
    knowledge_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question against a query backend
    Ask {
        question: String,

        /// sql or dax (default: NLQ_DIALECT or sql)
        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// Backend base URL (or set NLQ_BACKEND_URL)
        #[arg(long)]
        backend_url: Option<String>,

        /// Earlier turns of the conversation, oldest first
        #[arg(long = "history")]
        history: Vec<String>,

        /// Permit mutating statements
        #[arg(long)]
        allow_mutations: bool,

        /// OpenAI API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,

        /// Self-correction attempts (1-3)
        #[arg(long)]
        max_attempts: Option<u8>,
    },
    /// Show prior queries similar to a question
    Search {
        question: String,

        #[arg(short, long)]
        dialect: Option<Dialect>,
    },
    /// Print the features and analysis extracted from a question
    Features { question: String },
    /// Run the safety checks on a query
    Validate {
        query: String,

        #[arg(short, long)]
        dialect: Option<Dialect>,

        #[arg(long)]
        allow_mutations: bool,
    },
    /// Inspect and maintain the knowledge store
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeCommand,
    },
}

#[derive(Subcommand)]
enum KnowledgeCommand {
    /// Most successful entries
    Popular {
        #[arg(short, long)]
        dialect: Option<Dialect>,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Store-wide statistics
    Analytics,
    /// Write a JSON snapshot to stdout or a file
    Export {
        #[arg(short, long)]
        dialect: Option<Dialect>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a JSON snapshot
    Import { path: PathBuf },
    /// Remove stale entries that fail more than they succeed
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Record whether a remembered query worked
    Feedback {
        id: i64,

        /// Record a failure instead of a success
        #[arg(long)]
        failed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nlq_engine=info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(path) = args.knowledge_db {
        config.knowledge_db_path = path;
    }

    match args.command {
        Commands::Ask {
            question,
            dialect,
            backend_url,
            history,
            allow_mutations,
            api_key,
            max_attempts,
        } => {
            if let Some(dialect) = dialect {
                config.dialect = dialect;
            }
            if let Some(url) = backend_url {
                config.backend_url = Some(url);
            }
            if let Some(key) = api_key {
                config.llm.api_key = Some(key);
            }
            if let Some(attempts) = max_attempts {
                config.max_attempts = attempts;
            }
            config.validate()?;
            let request = AnswerRequest::new(question)
                .with_history(history)
                .with_validation(ValidationContext { allow_mutations });
            run_ask(config, request).await
        }
        Commands::Search { question, dialect } => {
            let dialect = dialect.unwrap_or(config.dialect);
            let knowledge = KnowledgeSearch::new(open_store(&config)?, config.search.clone());
            let matches = knowledge.search(&question, dialect).await;
            if matches.is_empty() {
                println!("No similar queries found");
            }
            for m in matches {
                println!(
                    "[{:.3} {:?}] #{} {}\n    {}",
                    m.similarity, m.match_type, m.entry.id, m.entry.question, m.entry.query_text
                );
            }
            Ok(())
        }
        Commands::Features { question } => {
            #[derive(Serialize)]
            struct Report {
                features: nlq_engine::semantic::QuestionFeatures,
                analysis: QuestionAnalysis,
            }
            print_json(&Report {
                features: FeatureExtractor::new().extract(&question),
                analysis: QuestionAnalysis::analyze(&question),
            })
        }
        Commands::Validate {
            query,
            dialect,
            allow_mutations,
        } => {
            let dialect = dialect.unwrap_or(config.dialect);
            SafetyValidator::new()
                .validate(&query, dialect, &ValidationContext { allow_mutations })
                .into_result()
                .context("Query rejected")?;
            println!("Query is safe to execute");
            Ok(())
        }
        Commands::Knowledge { action } => run_knowledge(&config, action).await,
    }
}

async fn run_ask(config: EngineConfig, request: AnswerRequest) -> Result<()> {
    let backend_url = config
        .backend_url
        .clone()
        .context("ask needs a backend: pass --backend-url or set NLQ_BACKEND_URL")?;
    let backend = Arc::new(HttpBackend::new(backend_url, config.dialect)?);
    let provider = Arc::new(OpenAiCompletionClient::new(&config.llm)?);
    let knowledge = Arc::new(KnowledgeSearch::new(open_store(&config)?, config.search.clone()));
    let engine = SelfCorrectionEngine::new(&config, provider, backend.clone(), backend, knowledge);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let result = engine.answer_with_cancellation(request, cancel).await;
    engine.wait_for_persistence().await;
    info!(
        "Finished with {:?} after {} attempt(s) in {}ms",
        result.outcome,
        result.attempts.len(),
        result.execution_time_ms
    );
    print_json(&result)
}

async fn run_knowledge(config: &EngineConfig, action: KnowledgeCommand) -> Result<()> {
    let store = open_store(config)?;
    match action {
        KnowledgeCommand::Popular { dialect, limit } => print_json(&store.popular(dialect, limit).await?),
        KnowledgeCommand::Analytics => print_json(&store.analytics().await?),
        KnowledgeCommand::Export { dialect, output } => {
            let snapshot = store.export(dialect).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} entries to {}", snapshot.total, path.display());
                    Ok(())
                }
                None => print_json(&snapshot),
            }
        }
        KnowledgeCommand::Import { path } => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            let snapshot: KnowledgeExport = serde_json::from_str(&raw).context("Invalid knowledge snapshot")?;
            let report = store.import(snapshot).await?;
            for error in &report.errors {
                warn!("{}", error);
            }
            println!("Imported {} entries ({} errors)", report.imported, report.errors.len());
            Ok(())
        }
        KnowledgeCommand::Cleanup { days } => {
            let removed = store.cleanup(days).await?;
            println!("Removed {} stale entries", removed);
            Ok(())
        }
        KnowledgeCommand::Feedback { id, failed } => {
            store.record_feedback(id, !failed).await?;
            println!("Recorded {} for entry {}", if failed { "failure" } else { "success" }, id);
            Ok(())
        }
    }
}

fn open_store(config: &EngineConfig) -> Result<Arc<dyn KnowledgeStore>> {
    if let Some(parent) = config.knowledge_db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteKnowledgeStore::open(&config.knowledge_db_path)
        .with_context(|| format!("Failed to open {}", config.knowledge_db_path.display()))?;
    Ok(Arc::new(store))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
