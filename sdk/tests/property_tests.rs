use proptest::prelude::*;
use sdk::errors::{AxonErrorExt, EngineError};
use sdk::types::{ParamSpec, ToolEnvelope, ToolSpec};

// Every error variant yields a non-empty, static user hint that never echoes
// the raw payload back.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-z]{12,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::DecompositionFailure(error_str.clone()),
            EngineError::ToolNotFound(error_str.clone()),
            EngineError::ParameterError(error_str.clone()),
            EngineError::TransientExecution(error_str.clone()),
            EngineError::StructuralFailure(error_str.clone()),
            EngineError::ValidationFailure(error_str.clone()),
            EngineError::ReferenceNotFound(error_str.clone()),
            EngineError::Reasoner(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Tool specs survive a JSON round-trip unchanged.
proptest! {
    #[test]
    fn test_tool_spec_roundtrip(
        name in "[a-z_]{1,20}",
        description in "[a-zA-Z ]{0,60}",
        params in proptest::collection::vec(("[a-z_]{1,12}", any::<bool>()), 0..5),
    ) {
        let mut spec = ToolSpec::new(name, description);
        for (param, required) in params {
            spec = spec.with_param(if required {
                ParamSpec::required(param, "string")
            } else {
                ParamSpec::optional(param, "integer")
            });
        }

        let json = serde_json::to_string(&spec).unwrap();
        let parsed: ToolSpec = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(spec, parsed);
    }
}

// A failure envelope is recognized regardless of its error text and flags.
proptest! {
    #[test]
    fn test_failure_envelope_detection(error in "\\PC{0,40}", retry in any::<bool>()) {
        let envelope = ToolEnvelope::failure(error.clone(), retry, None);
        let detected = ToolEnvelope::failure_from(&envelope.to_value());
        prop_assert!(detected.is_some());
        let detected = detected.unwrap();
        prop_assert_eq!(detected.error, Some(error));
        prop_assert_eq!(detected.retry, retry);
    }
}
