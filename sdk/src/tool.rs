//! Tool trait
//!
//! Every external capability the engine can invoke implements [`Tool`].
//! Concrete tool implementations (HTTP clients, file tools) live outside the
//! engine; it only ever sees the `ToolSpec` and the `execute` entry point.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{ToolError, ToolInput, ToolSpec};

/// Trait that all invocable tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static description used for resolution, parameter binding and prompts
    fn spec(&self) -> &ToolSpec;

    /// Returns the name of the tool
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Run the tool with bound parameters.
    ///
    /// A tool may return either a raw value or a structured envelope
    /// (`{"success": false, "error": .., "retry": .., "hint": ..}`). Raised
    /// errors are classified by their display text.
    async fn execute(&self, input: ToolInput) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamSpec;
    use serde_json::json;

    struct Echo {
        spec: ToolSpec,
    }

    #[async_trait]
    impl Tool for Echo {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, input: ToolInput) -> Result<Value, ToolError> {
            let text = input.param_str("text")?;
            Ok(json!({ "echo": text }))
        }
    }

    #[tokio::test]
    async fn test_tool_dispatch_through_trait_object() {
        let tool: Box<dyn Tool> = Box::new(Echo {
            spec: ToolSpec::new("echo", "Echo text back")
                .with_param(ParamSpec::required("text", "string")),
        });

        assert_eq!(tool.name(), "echo");

        let out = tool
            .execute(ToolInput::default().with_param("text", json!("hi")))
            .await
            .unwrap();
        assert_eq!(out, json!({"echo": "hi"}));

        let err = tool.execute(ToolInput::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingParameter(p) if p == "text"));
    }
}
