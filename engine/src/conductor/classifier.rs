//! Tool error classification
//!
//! Maps a raised tool error to an [`ErrorKind`]. The executor decides what to
//! do with each kind; nothing here knows about retries.

use regex::Regex;
use sdk::ToolError;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required parameter was absent; carries its name
    MissingParameter(String),
    /// The addressed resource does not exist or may not be accessed
    ResourceNotFound,
    /// Anything else
    Transient,
}

static MISSING_PARAM: OnceLock<Regex> = OnceLock::new();
static NOT_FOUND: OnceLock<Regex> = OnceLock::new();

fn missing_param_pattern() -> &'static Regex {
    MISSING_PARAM.get_or_init(|| {
        Regex::new(r#"(?i)missing\s+(?:required\s+)?(?:parameter|argument|field)s?\s*:?\s*[`'"]?([A-Za-z_][A-Za-z0-9_]*)"#)
            .expect("Invalid missing parameter pattern")
    })
}

fn not_found_pattern() -> &'static Regex {
    NOT_FOUND.get_or_init(|| {
        Regex::new(r"(?i)\bnot\s+found\b|\b404\b|\bno\s+such\b|\bdoes\s+not\s+exist\b|\bunauthori[sz]ed\b|\bforbidden\b|\b40[13]\b")
            .expect("Invalid not found pattern")
    })
}

/// Classify an error message
pub fn classify(message: &str) -> ErrorKind {
    if let Some(caps) = missing_param_pattern().captures(message) {
        if let Some(name) = caps.get(1) {
            return ErrorKind::MissingParameter(name.as_str().to_string());
        }
    }
    if not_found_pattern().is_match(message) {
        return ErrorKind::ResourceNotFound;
    }
    ErrorKind::Transient
}

/// Classify a tool error, trusting its variant where it is specific
pub fn classify_tool_error(error: &ToolError) -> ErrorKind {
    match error {
        ToolError::MissingParameter(name) => ErrorKind::MissingParameter(name.clone()),
        ToolError::NotFound(_) | ToolError::Unauthorized(_) => ErrorKind::ResourceNotFound,
        other => classify(&other.to_string()),
    }
}
