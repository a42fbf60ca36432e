use anyhow::{bail, Context};
use foundry_agent::{AgentRole, ContextConfig, RuntimeConfig};
use foundry_bus::BusConfig;
use foundry_orchestrator::CoordinatorConfig;
use foundry_validation::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "foundry.toml";
/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FOUNDRY_CONFIG";

/// Top-level `foundry.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundryConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
}

impl Default for FoundryConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            knowledge: KnowledgeConfig::default(),
            runtime: RuntimeConfig::default(),
            context: ContextConfig::default(),
            coordinator: CoordinatorConfig::default(),
            validation: ValidationConfig::default(),
            agents: default_agents(),
        }
    }
}

/// `[knowledge]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// JSONL file backing the store.
    #[serde(default = "default_knowledge_path")]
    pub path: PathBuf,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Weight of adjacent-word pairs in embeddings; 0 disables them.
    #[serde(default = "default_bigram_weight")]
    pub embedding_bigram_weight: f32,
    /// Upper bound on any single store call.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_knowledge_path() -> PathBuf {
    PathBuf::from("./data/knowledge.jsonl")
}

fn default_embedding_dimension() -> usize {
    256
}

fn default_bigram_weight() -> f32 {
    foundry_knowledge::DEFAULT_BIGRAM_WEIGHT
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: default_knowledge_path(),
            embedding_dimension: default_embedding_dimension(),
            embedding_bigram_weight: default_bigram_weight(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl KnowledgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub endpoint: String,
    pub role: AgentRole,
    /// Overrides the role's default capabilities when non-empty.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentConfig {
    fn for_role(role: AgentRole) -> Self {
        Self {
            endpoint: format!("{role}-1"),
            role,
            capabilities: Vec::new(),
        }
    }

    /// Effective capability set.
    pub fn capabilities(&self) -> BTreeSet<String> {
        if self.capabilities.is_empty() {
            self.role.default_capabilities()
        } else {
            self.capabilities.iter().cloned().collect()
        }
    }
}

/// One agent per role, enough to run the default pipeline.
fn default_agents() -> Vec<AgentConfig> {
    AgentRole::ALL
        .iter()
        .copied()
        .map(AgentConfig::for_role)
        .collect()
}

impl FoundryConfig {
    /// Resolves the config path: `--config`, then `FOUNDRY_CONFIG`, then
    /// `foundry.toml`. The flag says whether the path was asked for explicitly.
    pub fn resolve_path(flag: Option<PathBuf>) -> (PathBuf, bool) {
        if let Some(path) = flag {
            return (path, true);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => (PathBuf::from(path), true),
            _ => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Loads and checks the config at `path`. A missing file falls back to
    /// defaults unless `required` is set.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !path.exists() && !required {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Parses and checks a TOML document.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.coordinator.max_task_attempts == 0 {
            bail!("coordinator.max_task_attempts must be at least 1");
        }
        if self.knowledge.embedding_dimension == 0 {
            bail!("knowledge.embedding_dimension must be at least 1");
        }
        let bigram = self.knowledge.embedding_bigram_weight;
        if bigram.is_nan() || bigram < 0.0 {
            bail!("knowledge.embedding_bigram_weight must be a non-negative number");
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.endpoint.trim().is_empty() {
                bail!("agent endpoint must not be empty");
            }
            if !seen.insert(agent.endpoint.as_str()) {
                bail!("duplicate agent endpoint '{}'", agent.endpoint);
            }
        }
        Ok(())
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
