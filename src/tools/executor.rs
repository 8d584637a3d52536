//! Runs one approved tool call off the conversation task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::ToolCall;

use super::arguments::ToolArguments;
use super::registry::ToolRegistry;
use super::tool::ToolExecutionContext;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// What a tool run produced, ready to show to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub data: String,
}

impl ExecutionReport {
    pub fn success(data: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            data: data.into(),
        }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            data: data.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Interpret a tool's return value, or a result supplied by an
    /// approval actor that ran the tool itself.
    pub fn from_value(value: serde_json::Value) -> Self {
        if reports_failure(&value) {
            Self::error(render_value(value))
        } else {
            Self::success(render_value(value))
        }
    }
}

/// Dispatches calls to the registry. Never fails: every problem becomes an
/// error report.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn run(&self, call: &ToolCall, session_id: &str) -> ExecutionReport {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "requested tool is not registered");
            return ExecutionReport::error(format!("Tool '{}' not found", call.name));
        };

        let args = ToolArguments::new(call.arguments.clone());
        let ctx = ToolExecutionContext {
            call_id: call.id.clone(),
            session_id: session_id.to_string(),
        };
        let tool_name = call.name.clone();

        // A panicking tool surfaces as a JoinError instead of tearing down the turn.
        let handle = tokio::spawn(async move { tool.execute(&args, &ctx).await });
        let report = match handle.await {
            Ok(Ok(value)) => ExecutionReport::from_value(value),
            Ok(Err(e)) => ExecutionReport::error(e.to_string()),
            Err(join_err) => ExecutionReport::error(format!("tool task failed: {join_err}")),
        };

        debug!(
            tool = %tool_name,
            call_id = %call.id,
            success = report.is_success(),
            bytes = report.data.len(),
            "tool execution finished"
        );
        report
    }
}

/// Tools may return `{"status": "error", "data": ...}` to fail with a payload.
fn reports_failure(value: &serde_json::Value) -> bool {
    value.get("status").and_then(|s| s.as_str()) == Some("error")
}

fn render_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(ref map) => match map.get("data") {
            Some(serde_json::Value::String(data)) => data.clone(),
            _ => serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
        },
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DasiError;
    use crate::tools::{Tool, ToolArguments, ToolExecutionContext, ToolParameters};
    use async_trait::async_trait;

    /// Answers every call with a fixed result.
    struct Stub {
        parameters: ToolParameters,
        respond: fn() -> Result<serde_json::Value, DasiError>,
    }

    #[async_trait]
    impl Tool for Stub {
        fn name(&self) -> &str {
            "stub"
        }

        fn description(&self) -> &str {
            ""
        }

        fn parameters(&self) -> &ToolParameters {
            &self.parameters
        }

        async fn execute(
            &self,
            _args: &ToolArguments,
            _ctx: &ToolExecutionContext,
        ) -> Result<serde_json::Value, DasiError> {
            (self.respond)()
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: serde_json::json!({}),
        }
    }

    fn executor_with(respond: fn() -> Result<serde_json::Value, DasiError>) -> ToolExecutor {
        let stub = Stub {
            parameters: ToolParameters::empty(),
            respond,
        };
        ToolExecutor::new(Arc::new(ToolRegistry::new().with(Arc::new(stub))))
    }

    #[tokio::test]
    async fn data_field_is_unwrapped() {
        let executor =
            executor_with(|| Ok(serde_json::json!({"status": "success", "data": "42 widgets"})));
        let report = executor.run(&call("stub"), "s").await;
        assert_eq!(report, ExecutionReport::success("42 widgets"));
    }

    #[tokio::test]
    async fn tool_errors_become_error_reports() {
        let executor = executor_with(|| Err(DasiError::tool("stub", "boom")));
        let report = executor.run(&call("stub"), "s").await;
        assert_eq!(report.status, ExecutionStatus::Error);
        assert!(report.data.contains("boom"));
    }

    #[tokio::test]
    async fn error_status_payload_is_an_error_report() {
        let executor =
            executor_with(|| Ok(serde_json::json!({"status": "error", "data": "exit code 2"})));
        let report = executor.run(&call("stub"), "s").await;
        assert_eq!(report, ExecutionReport::error("exit code 2"));
    }

    #[tokio::test]
    async fn panics_are_captured() {
        let executor = executor_with(|| panic!("tool exploded"));
        let report = executor.run(&call("stub"), "s").await;
        assert_eq!(report.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
        let report = executor.run(&call("ghost"), "s").await;
        assert_eq!(report, ExecutionReport::error("Tool 'ghost' not found"));
    }

    #[test]
    fn supplied_results_are_interpreted_like_tool_output() {
        assert_eq!(
            ExecutionReport::from_value(serde_json::json!({"data": "15°C, cloudy"})),
            ExecutionReport::success("15°C, cloudy")
        );
        assert_eq!(
            ExecutionReport::from_value(serde_json::json!("plain")),
            ExecutionReport::success("plain")
        );
    }

    #[test]
    fn structured_values_render_as_pretty_json() {
        let rendered = render_value(serde_json::json!({"cpu": 4}));
        assert_eq!(rendered, "{\n  \"cpu\": 4\n}");
    }
}
