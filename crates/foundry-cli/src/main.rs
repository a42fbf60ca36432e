//! `foundry` command-line host: runs an in-process coordinator with demo
//! agents, and manages the knowledge store.

mod config;

use crate::config::{FoundryConfig, KnowledgeConfig};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use foundry_agent::{AgentRuntime, PromptExecutor, TemplateGenerator};
use foundry_bus::MessageBus;
use foundry_core::{AgentInfo, Priority};
use foundry_knowledge::{
    BoundedStore, FileKnowledgeStore, KnowledgeEntry, KnowledgeFilter, KnowledgeStore,
    LocalEmbedding, SourceType,
};
use foundry_orchestrator::{Coordinator, FeatureRequest, FeatureState, ProgressEvent};
use foundry_validation::ValidationEngine;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foundry", about = "Foundry: multi-agent task orchestration", version)]
struct Cli {
    /// Path to config file (defaults to $FOUNDRY_CONFIG, then foundry.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one feature through an in-process system and stream its progress
    Run {
        /// Feature title
        #[arg(long)]
        title: String,
        /// Feature description
        #[arg(long, default_value = "")]
        description: String,
        /// Requirement (repeatable)
        #[arg(long = "requirement")]
        requirements: Vec<String>,
        /// Acceptance criterion (repeatable)
        #[arg(long = "criterion")]
        acceptance_criteria: Vec<String>,
        /// low, normal, high or critical
        #[arg(long, default_value = "normal")]
        priority: String,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Manage the knowledge store
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Store an entry
    Add {
        /// Entry text
        content: String,
        /// pattern, documentation, failure or code
        #[arg(long, default_value = "documentation")]
        source: SourceType,
        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print the entries most relevant to a text, one JSON object per line
    Query {
        text: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
        /// Similarity floor
        #[arg(long)]
        min_relevance: Option<f32>,
        /// Only entries carrying this tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print entry totals
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let (path, required) = FoundryConfig::resolve_path(cli.config);
    let config = FoundryConfig::load(&path, required)?;

    match cli.command {
        Commands::Run {
            title,
            description,
            requirements,
            acceptance_criteria,
            priority,
            timeout_secs,
        } => {
            let request = FeatureRequest::new(title, description)
                .with_requirements(requirements)
                .with_acceptance_criteria(acceptance_criteria)
                .with_priority(parse_priority(&priority)?);
            run(config, request, Duration::from_secs(timeout_secs)).await?;
        }
        Commands::Knowledge { action } => {
            let store = open_store(&config.knowledge).await?;
            match action {
                KnowledgeAction::Add {
                    content,
                    source,
                    tags,
                } => {
                    let id = store
                        .store(KnowledgeEntry::new(content, source).with_tags(tags))
                        .await?;
                    println!("{id}");
                }
                KnowledgeAction::Query {
                    text,
                    limit,
                    min_relevance,
                    tags,
                } => {
                    let mut filter = KnowledgeFilter::any();
                    if !tags.is_empty() {
                        filter = filter.tags(tags);
                    }
                    if let Some(floor) = min_relevance {
                        filter = filter.min_relevance(floor);
                    }
                    let hits = store.query(&text, limit, &filter).await?;
                    let mut out = std::io::stdout().lock();
                    for hit in hits {
                        writeln!(
                            out,
                            "{}",
                            serde_json::json!({
                                "id": hit.entry.id,
                                "relevance": hit.relevance,
                                "source_type": hit.entry.source_type,
                                "tags": hit.entry.tags,
                                "content": hit.entry.content,
                            })
                        )?;
                    }
                }
                KnowledgeAction::Stats => {
                    let stats = store.stats().await?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
            }
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn parse_priority(raw: &str) -> anyhow::Result<Priority> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .with_context(|| format!("unknown priority '{raw}'"))
}

async fn open_store(config: &KnowledgeConfig) -> anyhow::Result<Arc<dyn KnowledgeStore>> {
    let embedder = Arc::new(
        LocalEmbedding::new(config.embedding_dimension)
            .with_bigram_weight(config.embedding_bigram_weight),
    );
    let file = FileKnowledgeStore::open(&config.path, embedder)
        .await
        .with_context(|| format!("Failed to open knowledge store '{}'", config.path.display()))?;
    Ok(Arc::new(BoundedStore::new(file, config.timeout())))
}

/// Starts the bus, store, coordinator and configured agents, submits one
/// feature and prints its progress events as JSON lines.
async fn run(config: FoundryConfig, request: FeatureRequest, timeout: Duration) -> anyhow::Result<()> {
    let bus = MessageBus::with_config(config.bus.clone());
    let store = open_store(&config.knowledge).await?;
    let validation = ValidationEngine::from_config(&config.validation)?;
    info!(gates = ?validation.gate_names(), "Validation gates loaded");

    let coordinator = Coordinator::builder(bus.clone())
        .config(config.coordinator.clone())
        .validation(validation)
        .knowledge(store.clone())
        .spawn()?;

    let mut agents = Vec::with_capacity(config.agents.len());
    for agent in &config.agents {
        let info = AgentInfo::new(&agent.endpoint, agent.role.to_string(), agent.capabilities());
        let executor = Arc::new(PromptExecutor::new(agent.role, Arc::new(TemplateGenerator)));
        let runtime = AgentRuntime::builder(info, bus.clone(), executor)
            .knowledge(store.clone(), config.context.clone())
            .config(config.runtime.clone())
            .build();
        runtime.start()?;
        agents.push(runtime);
    }
    coordinator
        .wait_for_agents(agents.len(), Duration::from_secs(10))
        .await?;
    info!(agents = agents.len(), "Agents registered");

    let (submitted, mut events) = coordinator.submit_watched(request).await?;
    info!(feature_id = %submitted.feature_id, "Feature submitted");

    let streamed = tokio::time::timeout(timeout, async {
        let mut out = std::io::stdout();
        while let Some(msg) = events.recv().await {
            let event: ProgressEvent = match msg.payload_as() {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed progress event");
                    continue;
                }
            };
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
            if event.is_final() {
                break;
            }
        }
        anyhow::Ok(())
    })
    .await;

    let feature = coordinator.feature(submitted.feature_id).await?;
    for runtime in &agents {
        runtime.stop().await;
    }
    coordinator.shutdown().await;

    match streamed {
        Ok(result) => result?,
        Err(_) => bail!("feature did not settle within {}s", timeout.as_secs()),
    }
    let Some(feature) = feature else {
        bail!("feature {} disappeared", submitted.feature_id);
    };
    if feature.state != FeatureState::Completed {
        bail!(
            "feature '{}' ended {}: {}",
            feature.title,
            feature.state,
            feature.errors.join("; ")
        );
    }
    info!(feature_id = %feature.id, "Feature completed");
    Ok(())
}
