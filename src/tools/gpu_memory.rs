// gpu_memory: manual control over the embedding model's device residency.
// Lets an operator free VRAM for another GPU application; the model reloads
// transparently on the next semantic request.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::state::ServerState;

use super::shared::ToolOutput;

fn default_status() -> String {
    "status".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GpuMemoryTool {
    /// "status" | "unload" | "reload"
    #[serde(default = "default_status")]
    pub action: String,
}

impl GpuMemoryTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        let embeddings = &state.embeddings;
        let message = match self.action.as_str() {
            "status" => {
                if embeddings.is_loaded().await {
                    let device = embeddings
                        .device()
                        .await
                        .map(|d| d.as_str().to_string())
                        .unwrap_or_else(|| "unknown".into());
                    let batch = embeddings.batch_size().await.unwrap_or(0);
                    let idle = embeddings
                        .idle_for_seconds()
                        .await
                        .map(|s| format!("{s}s ago"))
                        .unwrap_or_else(|| "never".into());
                    format!(
                        "Model loaded: yes\nDevice: {device}\nBatch size: {batch}\nLast use: {idle}\n\
                         Auto-unload after 5 minutes of inactivity."
                    )
                } else {
                    "Model loaded: no\nIt will load automatically on the next semantic request."
                        .to_string()
                }
            }
            "unload" => {
                if !embeddings.is_loaded().await {
                    "Model already unloaded.".to_string()
                } else {
                    embeddings.unload().await;
                    "Device memory freed. The model reloads automatically on the next semantic request."
                        .to_string()
                }
            }
            "reload" => {
                if embeddings.is_loaded().await {
                    "Model already loaded.".to_string()
                } else {
                    match embeddings.reload().await {
                        Ok(()) => {
                            let device = embeddings
                                .device()
                                .await
                                .map(|d| d.as_str().to_string())
                                .unwrap_or_else(|| "cpu".into());
                            format!("Model reloaded on {device}.")
                        }
                        Err(e) => format!("Reload failed: {e}"),
                    }
                }
            }
            other => format!("Unknown action '{other}' (use status, unload or reload)"),
        };
        Ok(ToolOutput::Text(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_defaults_to_status() {
        let tool: GpuMemoryTool = serde_json::from_str("{}").unwrap();
        assert_eq!(tool.action, "status");
    }
}
