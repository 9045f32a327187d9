//! Action executor used by the server.
//!
//! The server ships without live integrations: every action is logged with
//! its resolved configuration and succeeds, echoing that configuration back
//! as its output so downstream placeholders have something to read.

use async_trait::async_trait;
use autoflow_workflow::{ActionError, ActionExecutor, ActionRequest};
use serde_json::{Value as JsonValue, json};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, request: ActionRequest) -> Result<JsonValue, ActionError> {
        tracing::info!(
            run_id = %request.run_id,
            node_id = %request.node_id,
            definition_id = %request.definition_id,
            attempt = request.attempt,
            config = %JsonValue::Object(request.config.clone()),
            "dry run action"
        );
        Ok(json!({
            "definition_id": request.definition_id,
            "dry_run": true,
            "config": request.config,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::{NodeId, WorkflowId, WorkflowRunId};
    use serde_json::Map;

    #[tokio::test]
    async fn echoes_resolved_config() {
        let mut config = Map::new();
        config.insert("to".to_string(), json!("ada@example.com"));
        let request = ActionRequest {
            run_id: WorkflowRunId::new(),
            workflow_id: WorkflowId::new(),
            node_id: NodeId::new(),
            definition_id: "gmail.send_email".to_string(),
            config,
            attempt: 1,
        };

        let output = DryRunExecutor.execute(request).await.expect("execute");
        assert_eq!(output["config"]["to"], "ada@example.com");
        assert_eq!(output["dry_run"], true);
    }
}
