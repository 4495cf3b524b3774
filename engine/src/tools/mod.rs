pub mod analysis;

pub use analysis::DataAnalysisTool;

use sdk::{Tool, ToolSpec};
use std::sync::Arc;

/// Maximum characters of a tool description shown in a catalog prompt
const PROMPT_DESCRIPTION_CHARS: usize = 160;

/// Catalog of tools available to one run.
///
/// Supplied once per run and read-only afterwards. Order is registration
/// order, which is also the order tools are listed in prompts.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a tool. A later tool with the same name replaces the earlier one.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Add the built-in `analyze_data` tool
    pub fn with_builtin_analysis(self) -> Self {
        self.with_tool(Arc::new(DataAnalysisTool::new()))
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter().map(|t| t.spec())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// First tool offering a data-analysis capability
    pub fn analysis_tool(&self) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| is_analysis_tool(t.spec()))
            .cloned()
    }

    /// Bounded listing of the first `limit` tools for prompts.
    pub fn prompt_slice(&self, limit: usize) -> String {
        let mut lines: Vec<String> = self
            .specs()
            .take(limit)
            .map(|spec| {
                let mut description: String = spec
                    .description
                    .chars()
                    .take(PROMPT_DESCRIPTION_CHARS)
                    .collect();
                if spec.description.chars().count() > PROMPT_DESCRIPTION_CHARS {
                    description.push_str("...");
                }
                format!("- {}: {}", spec.signature(), description)
            })
            .collect();

        if self.len() > limit {
            lines.push(format!("(+{} more tools not shown)", self.len() - limit));
        }
        lines.join("\n")
    }
}

/// Whether a spec describes a data-analysis capability
pub fn is_analysis_tool(spec: &ToolSpec) -> bool {
    let name = spec.name.to_lowercase();
    let description = spec.description.to_lowercase();
    name.contains("analy") || description.contains("data analysis")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sdk::{ToolError, ToolInput};
    use serde_json::Value;

    struct Named(ToolSpec);

    #[async_trait]
    impl Tool for Named {
        fn spec(&self) -> &ToolSpec {
            &self.0
        }

        async fn execute(&self, _input: ToolInput) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    fn tool(name: &str, description: &str) -> Arc<dyn Tool> {
        Arc::new(Named(ToolSpec::new(name, description)))
    }

    #[test]
    fn test_register_replaces_same_name() {
        let catalog = ToolCatalog::empty()
            .with_tool(tool("a", "first"))
            .with_tool(tool("b", "second"))
            .with_tool(tool("a", "replacement"));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names(), vec!["b", "a"]);
        assert_eq!(catalog.get("a").unwrap().spec().description, "replacement");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_prompt_slice_is_bounded() {
        let mut catalog = ToolCatalog::empty();
        for i in 0..5 {
            catalog.register(tool(&format!("tool_{}", i), &"x".repeat(400)));
        }

        let slice = catalog.prompt_slice(2);
        assert_eq!(slice.lines().count(), 3);
        assert!(slice.contains("tool_0"));
        assert!(!slice.contains("tool_4"));
        assert!(slice.contains("+3 more tools"));
        assert!(slice.len() < 2 * (PROMPT_DESCRIPTION_CHARS + 40) + 40);
    }

    #[test]
    fn test_analysis_tool_detection() {
        let catalog = ToolCatalog::empty()
            .with_tool(tool("get_activities", "List activities"))
            .with_builtin_analysis();

        assert_eq!(catalog.analysis_tool().unwrap().name(), "analyze_data");
    }
}
