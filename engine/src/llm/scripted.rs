//! Deterministic rule-based reasoner.
//!
//! Replies are chosen by matching substrings of the prompt against an
//! ordered rule list. Used to drive the engine offline: tests, dry runs and
//! reproducing a trace without a model.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{Reasoner, Result};

#[derive(Debug, Clone)]
struct Rule {
    needles: Vec<String>,
    response: String,
    once: bool,
    used: bool,
}

/// Reasoner that answers from a fixed script
#[derive(Debug)]
pub struct ScriptedReasoner {
    rules: Mutex<Vec<Rule>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: String::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `response` whenever the prompt contains every needle.
    /// Rules are tried in insertion order.
    pub fn when(self, needles: &[&str], response: impl Into<String>) -> Self {
        self.push_rule(needles, response.into(), false)
    }

    /// Like [`ScriptedReasoner::when`], but the rule only fires once.
    pub fn when_once(self, needles: &[&str], response: impl Into<String>) -> Self {
        self.push_rule(needles, response.into(), true)
    }

    /// Reply used when no rule matches
    pub fn otherwise(mut self, response: impl Into<String>) -> Self {
        self.fallback = response.into();
        self
    }

    fn push_rule(self, needles: &[&str], response: String, once: bool) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                needles: needles.iter().map(|n| n.to_string()).collect(),
                response,
                once,
                used: false,
            });
        self
    }

    /// Every prompt received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of received prompts containing `needle`
    pub fn count_containing(&self, needle: &str) -> usize {
        self.prompts()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }

    fn reply(&self, prompt: &str) -> String {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        for rule in rules.iter_mut() {
            if rule.once && rule.used {
                continue;
            }
            if rule.needles.iter().all(|n| prompt.contains(n.as_str())) {
                rule.used = true;
                return rule.response.clone();
            }
        }
        self.fallback.clone()
    }
}

impl Default for ScriptedReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _system: &str, _temperature: f32) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        Ok(self.reply(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_in_order() {
        let reasoner = ScriptedReasoner::new()
            .when(&["alpha", "beta"], "both")
            .when(&["alpha"], "first")
            .otherwise("none");

        assert_eq!(reasoner.generate("alpha beta", "", 0.0).await.unwrap(), "both");
        assert_eq!(reasoner.generate("alpha only", "", 0.0).await.unwrap(), "first");
        assert_eq!(reasoner.generate("gamma", "", 0.0).await.unwrap(), "none");
        assert_eq!(reasoner.prompts().len(), 3);
        assert_eq!(reasoner.count_containing("alpha"), 2);
    }

    #[tokio::test]
    async fn test_once_rule_is_consumed() {
        let reasoner = ScriptedReasoner::new()
            .when_once(&["check"], "NO")
            .when(&["check"], "YES");

        assert_eq!(reasoner.generate("check", "", 0.0).await.unwrap(), "NO");
        assert_eq!(reasoner.generate("check", "", 0.0).await.unwrap(), "YES");
        assert_eq!(reasoner.generate("check", "", 0.0).await.unwrap(), "YES");
    }
}
