//! Live flood warnings from the Environment Agency flood-monitoring API.
//!
//! Every outcome is text: upstream failures, empty feeds and filter misses
//! all produce a message the model can relay, never an `Err`.

use async_trait::async_trait;
use flavia_config::FloodConfig;
use flavia_core::error::ToolError;
use flavia_core::tool::Tool;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const NO_CURRENT_WARNINGS: &str = "No current flood warnings or alerts in the UK.";

pub struct FloodMonitoringTool {
    client: reqwest::Client,
    endpoint: String,
    max_records: usize,
    message_max_chars: usize,
}

impl FloodMonitoringTool {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "flood_monitoring_tool".into(),
                reason: format!("HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_records: 10,
            message_max_chars: 200,
        })
    }

    pub fn from_config(config: &FloodConfig) -> Result<Self, ToolError> {
        let mut tool = Self::new(&config.endpoint, Duration::from_secs(config.timeout_secs))?;
        tool.max_records = config.max_records;
        tool.message_max_chars = config.message_max_chars;
        Ok(tool)
    }

    async fn fetch(&self) -> Result<FetchOutcome, reqwest::Error> {
        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Ok(FetchOutcome::Status(status.as_u16()));
        }
        let feed: FloodFeed = response.json().await?;
        Ok(FetchOutcome::Items(feed.items.unwrap_or_default()))
    }
}

enum FetchOutcome {
    Status(u16),
    Items(Vec<FloodWarning>),
}

#[derive(Debug, Deserialize)]
pub struct FloodArgs {
    #[serde(default)]
    pub area_or_region: Option<String>,
}

/// The feed envelope: `{ "items": [...] }`.
#[derive(Debug, Deserialize)]
struct FloodFeed {
    #[serde(default)]
    items: Option<Vec<FloodWarning>>,
}

/// One flood warning record. Every field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloodWarning {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub ea_area_name: Option<String>,
    #[serde(default)]
    pub flood_area: Option<FloodArea>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub time_message_changed: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FloodArea {
    #[serde(default)]
    pub county: Option<String>,
}

impl FloodWarning {
    fn county(&self) -> Option<&str> {
        self.flood_area.as_ref()?.county.as_deref()
    }

    /// Case-insensitive substring match on description, region and county.
    fn matches(&self, needle_lower: &str) -> bool {
        [
            self.description.as_deref(),
            self.ea_area_name.as_deref(),
            self.county(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle_lower))
    }

    /// Render as a fixed-field block.
    pub fn render(&self, message_max_chars: usize) -> String {
        let message = self.message.as_deref().unwrap_or("No additional information");
        let truncated: String = message.chars().take(message_max_chars).collect();
        let ellipsis = if message.chars().count() > message_max_chars {
            "..."
        } else {
            ""
        };

        format!(
            "\nArea: {} ({})\nRegion: {}\nSeverity: {}\nLatest Update: {}\nMessage: {}{}\n---",
            self.description.as_deref().unwrap_or("Unknown area"),
            self.county().unwrap_or("Unknown county"),
            self.ea_area_name.as_deref().unwrap_or("Unknown region"),
            self.severity.as_deref().unwrap_or("Unknown"),
            self.time_message_changed.as_deref().unwrap_or("Unknown time"),
            truncated,
            ellipsis,
        )
    }
}

/// Filter, truncate and format a feed. `area` is already trimmed; empty
/// means no filter.
pub fn summarise(
    items: &[FloodWarning],
    area: &str,
    max_records: usize,
    message_max_chars: usize,
) -> String {
    if items.is_empty() {
        return NO_CURRENT_WARNINGS.to_string();
    }

    let retained: Vec<&FloodWarning> = if area.is_empty() {
        items.iter().collect()
    } else {
        let needle = area.to_lowercase();
        items.iter().filter(|w| w.matches(&needle)).collect()
    };

    if retained.is_empty() {
        return format!(
            "No current flood warnings found for '{area}'. There may be warnings in other areas."
        );
    }

    let mut summary = format!("Found {} active flood warning(s)", retained.len());
    if !area.is_empty() {
        summary.push_str(&format!(" for '{area}'"));
    }
    summary.push_str(":\n\n");

    let blocks: Vec<String> = retained
        .iter()
        .take(max_records)
        .map(|w| w.render(message_max_chars))
        .collect();

    summary + &blocks.join("\n")
}

#[async_trait]
impl Tool for FloodMonitoringTool {
    type Args = FloodArgs;

    fn name(&self) -> &str {
        "flood_monitoring_tool"
    }

    fn description(&self) -> &str {
        "This tool fetches current flood warnings and alerts from the UK Environment Agency. \
         Use this to get real-time flood information for specific areas or all current floods."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "area_or_region": {
                    "type": "string",
                    "description": "Optional area name to filter results (e.g., \"Yorkshire\", \"Thames\", \"London\")"
                }
            }
        })
    }

    async fn call(&self, args: FloodArgs) -> Result<String, ToolError> {
        // Whitespace-only means no filter; a miss names the trimmed term.
        let area = args.area_or_region.as_deref().unwrap_or("").trim();
        let started = Instant::now();

        let outcome = self.fetch().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(match outcome {
            Ok(FetchOutcome::Status(status)) => {
                warn!(status, elapsed_ms, "Flood feed returned non-200");
                format!("Unable to fetch flood data. API returned status: {status}")
            }
            Ok(FetchOutcome::Items(items)) => {
                debug!(items = items.len(), area = %area, elapsed_ms, "Flood feed fetched");
                summarise(&items, area, self.max_records, self.message_max_chars)
            }
            Err(e) => {
                warn!(error = %e, elapsed_ms, "Flood feed request failed");
                format!(
                    "Error fetching flood data: {e}. Please try again or contact emergency services on 999 if this is urgent."
                )
            }
        })
    }
}
