//! Built-in data analysis tool
//!
//! Counts, filters, plucks and sums over a list that the executor injects
//! from the execution context. It never fetches anything itself.

use async_trait::async_trait;
use sdk::{ParamSpec, Tool, ToolError, ToolInput, ToolSpec};
use serde_json::{json, Value};

pub const ANALYSIS_TOOL_NAME: &str = "analyze_data";

/// Operations over a list of records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOp {
    Count,
    Filter,
    Pluck,
    Sum,
    Unique,
}

impl AnalysisOp {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "count" => Some(Self::Count),
            "filter" => Some(Self::Filter),
            "pluck" | "select" => Some(Self::Pluck),
            "sum" | "total" => Some(Self::Sum),
            "unique" | "distinct" => Some(Self::Unique),
            _ => None,
        }
    }
}

pub struct DataAnalysisTool {
    spec: ToolSpec,
}

impl DataAnalysisTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            ANALYSIS_TOOL_NAME,
            "Data analysis over already-fetched records: count, filter, pluck, sum or list unique values of a field",
        )
        .with_param(
            ParamSpec::required("data", "array").with_description("Records to analyze"),
        )
        .with_param(
            ParamSpec::required("operation", "string")
                .with_description("One of count, filter, pluck, sum, unique"),
        )
        .with_param(ParamSpec::optional("field", "string").with_description("Field to inspect"))
        .with_param(
            ParamSpec::optional("equals", "string")
                .with_description("Keep records whose field equals this value"),
        )
        .with_param(
            ParamSpec::optional("contains", "string")
                .with_description("Keep records whose field contains this text"),
        );

        Self { spec }
    }
}

impl Default for DataAnalysisTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DataAnalysisTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, input: ToolInput) -> Result<Value, ToolError> {
        let data = input
            .param_json("data")?
            .as_array()
            .ok_or_else(|| ToolError::InvalidParameter("data must be an array".to_string()))?;
        let op_name = input.param_str("operation")?;
        let op = AnalysisOp::parse(&op_name)
            .ok_or_else(|| ToolError::InvalidParameter(format!("unknown operation '{}'", op_name)))?;
        let field = input.param_str_opt("field");
        let equals = input.params.get("equals").filter(|v| !v.is_null());
        let contains = input.param_str_opt("contains").map(|c| c.to_lowercase());

        let matching: Vec<&Value> = data
            .iter()
            .filter(|item| {
                let Some(field) = field.as_deref() else {
                    return true;
                };
                let value = item.get(field);
                if let Some(expected) = equals {
                    if !value.is_some_and(|v| values_equal(v, expected)) {
                        return false;
                    }
                }
                if let Some(needle) = contains.as_deref() {
                    if !value.is_some_and(|v| as_text(v).to_lowercase().contains(needle)) {
                        return false;
                    }
                }
                true
            })
            .collect();

        let require_field = || {
            field
                .clone()
                .ok_or_else(|| ToolError::MissingParameter("field".to_string()))
        };

        match op {
            AnalysisOp::Count => Ok(json!(matching.len())),
            AnalysisOp::Filter => Ok(Value::Array(matching.into_iter().cloned().collect())),
            AnalysisOp::Pluck => {
                let field = require_field()?;
                Ok(Value::Array(
                    matching
                        .iter()
                        .filter_map(|item| item.get(&field).cloned())
                        .collect(),
                ))
            }
            AnalysisOp::Sum => {
                let field = require_field()?;
                let total: f64 = matching
                    .iter()
                    .filter_map(|item| item.get(&field).and_then(as_number))
                    .sum();
                Ok(json!(total))
            }
            AnalysisOp::Unique => {
                let field = require_field()?;
                let mut seen: Vec<Value> = Vec::new();
                for value in matching.iter().filter_map(|item| item.get(&field)) {
                    if !seen.contains(value) {
                        seen.push(value.clone());
                    }
                }
                Ok(Value::Array(seen))
            }
        }
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return (a - b).abs() < f64::EPSILON;
    }
    as_text(actual).eq_ignore_ascii_case(&as_text(expected))
}
