//! Flavia's tools.
//!
//! - `retriever_tool`: searches the approved British Red Cross flood guidance
//! - `flood_monitoring_tool`: live Environment Agency flood warnings

pub mod flood_monitoring;
pub mod retrieval;

use flavia_config::AppConfig;
use flavia_core::error::ToolError;
use flavia_core::knowledge::KnowledgeBase;
use flavia_core::tool::ToolRegistry;
use std::sync::Arc;

pub use flood_monitoring::FloodMonitoringTool;
pub use retrieval::RetrieverTool;

/// Build the registry the agent loop dispatches through.
pub fn default_registry(
    knowledge: Arc<dyn KnowledgeBase>,
    config: &AppConfig,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(RetrieverTool::new(knowledge).with_top_k(config.retrieval.top_k))?;
    registry.register(FloodMonitoringTool::from_config(&config.flood)?)?;
    Ok(registry)
}
