pub mod chat;
pub mod init;
pub mod serve;

use std::sync::Arc;

use flavia_agent::AgentLoop;
use flavia_config::{AppConfig, CheckpointBackend};
use flavia_core::checkpoint::CheckpointStore;
use flavia_core::knowledge::KnowledgeBase;
use flavia_core::provider::Provider;
use flavia_memory::{FileCheckpointStore, InMemoryCheckpointStore, VectorKnowledgeBase};
use flavia_providers::AzureOpenAiProvider;
use tracing::info;

/// Load config or explain how to create one.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Wire the model client, knowledge index, tools and checkpoint store into
/// one agent loop.
pub fn build_agent(config: &AppConfig) -> Result<Arc<AgentLoop>, Box<dyn std::error::Error>> {
    let azure = AzureOpenAiProvider::from_config(config).map_err(|e| {
        format!(
            "{e}\n  Set AZURE_OPENAI_ENDPOINT_CHAT and AZURE_OPENAI_API_KEY, or edit {}",
            AppConfig::config_dir().join("config.toml").display()
        )
    })?;
    let embedding_deployment = azure.embedding_deployment().map(str::to_string);
    let provider: Arc<dyn Provider> = Arc::new(azure);

    let mut knowledge = VectorKnowledgeBase::load(&config.retrieval.index_path)?;
    if let Some(deployment) = embedding_deployment {
        knowledge = knowledge.with_embedder(provider.clone(), deployment);
    }
    let knowledge: Arc<dyn KnowledgeBase> = Arc::new(knowledge);

    let tools = Arc::new(flavia_tools::default_registry(knowledge, config)?);

    let checkpoints: Arc<dyn CheckpointStore> = match config.checkpoints.backend {
        CheckpointBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointBackend::File => Arc::new(FileCheckpointStore::new(&config.checkpoints.dir)),
    };

    info!(
        deployment = %config.model.deployment,
        tools = ?tools.names(),
        checkpoints = ?config.checkpoints.backend,
        "Agent ready"
    );

    let agent = AgentLoop::new(provider, &config.model.deployment, tools, checkpoints)
        .with_temperature(config.model.temperature)
        .with_max_tokens(config.model.max_tokens)
        .with_config(&config.agent);

    Ok(Arc::new(agent))
}
