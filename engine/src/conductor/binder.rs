//! Parameter Binding
//!
//! Builds the argument map for a resolved tool. Sources, highest priority
//! first:
//!
//! 1. fields in context whose name matches a declared parameter exactly
//! 2. literal identifiers in the step or goal text ("activity 123")
//! 3. values proposed by the reasoner for whatever is still missing
//!
//! Undeclared keys are dropped, as are nulls that did not come from context.
//! A required parameter that is still missing gets one targeted search of
//! the active item before binding fails.

use crate::conductor::engine::TreeScope;
use crate::conductor::types::RetryState;
use crate::llm::parse::extract_json;
use crate::llm::ReasonerClient;
use regex::Regex;
use sdk::errors::EngineError;
use sdk::{ParamSpec, Params, ToolSpec};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

const BINDER_SYSTEM: &str =
    "You fill in tool parameters. Reply with one JSON object and nothing else.";

/// Upper bound on the context preview included in binding prompts
const PREVIEW_CHARS: usize = 2000;

/// Parameter names that take a whole list from context
const DATA_PARAMS: &[&str] = &["data", "items", "records"];

static LITERAL_ID: OnceLock<Regex> = OnceLock::new();

fn literal_id_pattern() -> &'static Regex {
    LITERAL_ID.get_or_init(|| {
        Regex::new(r"(?i)\b(activity|record|item)\s*(?:id\s*)?[#:]?\s*(\d+)\b")
            .expect("Invalid literal id pattern")
    })
}

/// What the binder needs to know about the step being bound
pub struct BindRequest<'a> {
    pub description: &'a str,
    pub goal: &'a str,
    pub retry: &'a RetryState,
}

pub struct ParamBinder {
    reasoner: ReasonerClient,
}

impl ParamBinder {
    pub fn new(reasoner: ReasonerClient) -> Self {
        Self { reasoner }
    }

    pub async fn bind(
        &self,
        spec: &ToolSpec,
        request: &BindRequest<'_>,
        scope: &TreeScope,
    ) -> Result<Params, EngineError> {
        let mut params = Params::new();
        let mut from_context: HashSet<String> = HashSet::new();

        for param in &spec.parameters {
            if let Some(value) = scope.ctx.find_field(&scope.keys, &param.name).await? {
                params.insert(param.name.clone(), value);
                from_context.insert(param.name.clone());
            } else if is_data_param(param) {
                if let Some((key, items)) = scope.ctx.latest_list(&scope.keys).await? {
                    debug!("Injecting {} items from '{}' as `{}`", items.len(), key, param.name);
                    params.insert(param.name.clone(), Value::Array(items));
                    from_context.insert(param.name.clone());
                }
            }
        }

        let mut from_text: HashSet<String> = HashSet::new();
        for text in [request.description, request.goal] {
            from_text.extend(bind_literal_ids(spec, text, &mut params));
        }

        // On a retry only the reasoner's own earlier values are reopened
        let revising = request.retry.attempt > 0;
        let open: Vec<&ParamSpec> = spec
            .parameters
            .iter()
            .filter(|p| {
                if revising {
                    !from_context.contains(&p.name) && !from_text.contains(&p.name)
                } else {
                    !params.contains_key(&p.name)
                }
            })
            .collect();
        if !open.is_empty() {
            self.propose(spec, request, scope, &open, &mut params).await?;
        }

        params.retain(|key, value| {
            spec.accepts(key) && (!value.is_null() || from_context.contains(key))
        });

        for param in spec.required_params() {
            let present = params.get(&param.name).is_some_and(|v| !v.is_null());
            if present {
                continue;
            }
            match recover_parameter(scope, &param.name).await? {
                Some(value) => {
                    debug!("Recovered `{}` by targeted search", param.name);
                    params.insert(param.name.clone(), value);
                }
                None => {
                    return Err(EngineError::ParameterError(format!(
                        "missing required parameter `{}` for {}",
                        param.name, spec.name
                    )))
                }
            }
        }

        Ok(params)
    }

    async fn propose(
        &self,
        spec: &ToolSpec,
        request: &BindRequest<'_>,
        scope: &TreeScope,
        open: &[&ParamSpec],
        params: &mut Params,
    ) -> Result<(), EngineError> {
        let wanted: Vec<String> = open
            .iter()
            .map(|p| {
                format!(
                    "- {} ({}, {}): {}",
                    p.name,
                    p.param_type,
                    if p.required { "required" } else { "optional" },
                    p.description
                )
            })
            .collect();
        let mut prompt = format!(
            "Propose values for the missing parameters of this tool call.\n\n\
             Step: {}\nGoal: {}\nTool: {}\n\nParameters to fill:\n{}\n\n\
             Known parameters: {}\n\nContext (structure only):\n{}\n",
            request.description,
            request.goal,
            spec.signature(),
            wanted.join("\n"),
            Value::Object(params.clone()),
            scope.ctx.preview(&scope.keys, PREVIEW_CHARS).await,
        );
        if let Some(feedback) = request.retry.feedback() {
            prompt.push_str(&format!("\n{}\n", feedback));
        }
        prompt.push_str(
            "\nReply with a JSON object mapping parameter names to values. \
             Use null when a value is unknown; never invent identifiers.",
        );

        let reply = match self.reasoner.ask(&prompt, BINDER_SYSTEM, scope.cancel()).await {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!("Parameter proposal for {} failed: {}", spec.name, e);
                return Ok(());
            }
        };

        let Some(Value::Object(proposed)) = extract_json(&reply) else {
            warn!("Parameter proposal for {} was not a JSON object", spec.name);
            return Ok(());
        };
        for (key, value) in proposed {
            if !open.iter().any(|p| p.name == key) {
                continue;
            }
            if !value.is_null() || !params.contains_key(&key) {
                params.insert(key, value);
            }
        }
        Ok(())
    }
}

fn is_data_param(param: &ParamSpec) -> bool {
    param.param_type == "array" && DATA_PARAMS.contains(&param.name.as_str())
}

/// Fill `<word>_id` (or plain `id`) from "activity 123" style mentions.
/// Returns the keys it set.
fn bind_literal_ids(spec: &ToolSpec, text: &str, params: &mut Params) -> Vec<String> {
    let mut bound = Vec::new();
    for caps in literal_id_pattern().captures_iter(text) {
        let word = caps[1].to_lowercase();
        let raw = &caps[2];
        let value = raw
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string()));

        for key in [format!("{}_id", word), "id".to_string()] {
            if spec.accepts(&key) {
                if !params.contains_key(&key) {
                    params.insert(key.clone(), value.clone());
                    bound.push(key);
                }
                break;
            }
        }
    }
    bound
}

/// Look for `name`, or `id` when `name` is an `<x>_id` parameter, on the
/// active item; then for `name` anywhere in visible context.
pub async fn recover_parameter(scope: &TreeScope, name: &str) -> Result<Option<Value>, EngineError> {
    let mut aliases = vec![name];
    if name.ends_with("_id") {
        aliases.push("id");
    }

    if let Some(item) = scope.ctx.active_item(&scope.keys).await? {
        for alias in &aliases {
            if let Some(value) = item.get(*alias).filter(|v| !v.is_null()) {
                return Ok(Some(value.clone()));
            }
        }
    }

    Ok(scope
        .ctx
        .find_field(&scope.keys, name)
        .await?
        .filter(|v| !v.is_null()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::context::{ContextStore, KeyScope};
    use crate::conductor::store::MemoryBulkStore;
    use crate::llm::ScriptedReasoner;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn binder(reasoner: Arc<ScriptedReasoner>) -> ParamBinder {
        ParamBinder::new(ReasonerClient::new(reasoner, Duration::from_secs(5), 0.0))
    }

    fn root_scope() -> TreeScope {
        let ctx = ContextStore::new(Arc::new(MemoryBulkStore::new()), 5120);
        TreeScope::root(Arc::new(ctx), CancellationToken::new())
    }

    fn kudos_spec() -> ToolSpec {
        ToolSpec::new("get_activity_kudos", "List kudos for an activity")
            .with_param(ParamSpec::required("activity_id", "integer"))
            .with_param(ParamSpec::optional("per_page", "integer"))
    }

    #[tokio::test]
    async fn test_context_fields_win_and_keep_nulls() {
        let scope = root_scope();
        scope
            .ctx
            .put("(0,0)", json!({"activity_id": 42, "per_page": null}))
            .await
            .unwrap();
        let reasoner = Arc::new(ScriptedReasoner::new().otherwise(r#"{"activity_id": 7}"#));
        let retry = RetryState::default();
        let request = BindRequest {
            description: "Get kudos for activity 99",
            goal: "g",
            retry: &retry,
        };

        let params = binder(reasoner.clone())
            .bind(&kudos_spec(), &request, &scope)
            .await
            .unwrap();

        assert_eq!(params.get("activity_id"), Some(&json!(42)));
        assert_eq!(params.get("per_page"), Some(&Value::Null));
        assert!(reasoner.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_literal_ids_from_text() {
        let scope = root_scope();
        let reasoner = Arc::new(ScriptedReasoner::new().otherwise(r#"{"per_page": 10}"#));
        let retry = RetryState::default();
        let request = BindRequest {
            description: "Get the kudos givers for this activity",
            goal: "Get the kudos givers for activity 16243029035",
            retry: &retry,
        };

        let params = binder(reasoner).bind(&kudos_spec(), &request, &scope).await.unwrap();
        assert_eq!(params.get("activity_id"), Some(&json!(16243029035u64)));
        assert_eq!(params.get("per_page"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn test_reasoner_proposal_is_filtered() {
        let scope = root_scope();
        let reasoner = Arc::new(ScriptedReasoner::new().when(
            &["Propose values for the missing parameters"],
            "```json\n{\"activity_id\": 5, \"per_page\": null, \"limit\": 3}\n```",
        ));
        let retry = RetryState::default();
        let request = BindRequest {
            description: "Get kudos",
            goal: "g",
            retry: &retry,
        };

        let params = binder(reasoner.clone())
            .bind(&kudos_spec(), &request, &scope)
            .await
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("activity_id"), Some(&json!(5)));
        assert!(reasoner.prompts()[0].contains("activity_id (integer, required)"));
    }

    #[tokio::test]
    async fn test_missing_required_is_parameter_error() {
        let scope = root_scope();
        let reasoner = Arc::new(ScriptedReasoner::new().otherwise("{}"));
        let retry = RetryState::default();
        let request = BindRequest {
            description: "Get kudos",
            goal: "g",
            retry: &retry,
        };

        let err = binder(reasoner)
            .bind(&kudos_spec(), &request, &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ParameterError(msg) if msg.contains("activity_id")));
    }

    #[tokio::test]
    async fn test_targeted_search_uses_item_id_alias() {
        let root = root_scope();
        root.ctx
            .put("dendrite_item_(1,0)", json!({"id": 16243029035u64, "name": "Morning Run"}))
            .await
            .unwrap();
        let scope = TreeScope::nested(
            root.ctx.clone(),
            CancellationToken::new(),
            KeyScope::root().child("(0,0)", 0, Some("dendrite_item_(1,0)".to_string())),
        );
        let reasoner = Arc::new(ScriptedReasoner::new().otherwise("{}"));
        let retry = RetryState::default();
        let request = BindRequest {
            description: "Get kudos for the current item",
            goal: "g",
            retry: &retry,
        };

        let params = binder(reasoner).bind(&kudos_spec(), &request, &scope).await.unwrap();
        assert_eq!(params.get("activity_id"), Some(&json!(16243029035u64)));
    }

    #[tokio::test]
    async fn test_retry_revises_with_feedback() {
        let scope = root_scope();
        let reasoner = Arc::new(ScriptedReasoner::new().when(
            &["use per_page at most 50"],
            r#"{"activity_id": 5, "per_page": 50}"#,
        ));
        let mut retry = RetryState::default();
        let mut last = Params::new();
        last.insert("per_page".to_string(), json!(500));
        retry.record("per_page too large", Some("use per_page at most 50".to_string()), &last);
        let request = BindRequest {
            description: "Get kudos for activity 5",
            goal: "g",
            retry: &retry,
        };

        let params = binder(reasoner).bind(&kudos_spec(), &request, &scope).await.unwrap();
        assert_eq!(params.get("per_page"), Some(&json!(50)));
        assert_eq!(params.get("activity_id"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_retry_keeps_literal_ids_from_text() {
        let scope = root_scope();
        let reasoner = Arc::new(ScriptedReasoner::new().when(
            &["Propose values for the missing parameters"],
            r#"{"activity_id": 7, "per_page": 20}"#,
        ));
        let mut retry = RetryState::default();
        let mut last = Params::new();
        last.insert("activity_id".to_string(), json!(101));
        last.insert("per_page".to_string(), json!(500));
        retry.record("per_page too large", None, &last);
        let request = BindRequest {
            description: "Get the kudos givers",
            goal: "Get the kudos givers for activity 101",
            retry: &retry,
        };

        let params = binder(reasoner.clone())
            .bind(&kudos_spec(), &request, &scope)
            .await
            .unwrap();
        assert_eq!(params.get("activity_id"), Some(&json!(101)));
        assert_eq!(params.get("per_page"), Some(&json!(20)));

        let prompt = &reasoner.prompts()[0];
        assert!(prompt.contains("per_page (integer, optional)"));
        assert!(!prompt.contains("activity_id (integer, required)"));
    }

    #[tokio::test]
    async fn test_data_param_takes_latest_list() {
        let scope = root_scope();
        scope.ctx.put("(0,0)", json!([{"type": "Run"}, {"type": "Ride"}])).await.unwrap();
        let spec = ToolSpec::new("analyze_data", "Data analysis")
            .with_param(ParamSpec::required("data", "array"))
            .with_param(ParamSpec::required("operation", "string"));
        let reasoner = Arc::new(ScriptedReasoner::new().otherwise(r#"{"operation": "count"}"#));
        let retry = RetryState::default();
        let request = BindRequest {
            description: "Count the activities",
            goal: "g",
            retry: &retry,
        };

        let params = binder(reasoner).bind(&spec, &request, &scope).await.unwrap();
        assert_eq!(params["data"].as_array().unwrap().len(), 2);
        assert_eq!(params["operation"], json!("count"));
    }
}
