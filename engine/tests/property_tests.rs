use axon_engine::conductor::context::{bounded_view, KeyScope};
use axon_engine::conductor::planner::{dedup_descriptions, normalize};
use axon_engine::conductor::spawner::{item_label, render_item_goal};
use axon_engine::conductor::{ContextStore, MemoryBulkStore, NeuronId, StoredValue};
use axon_engine::config::Config;
use axon_engine::llm::parse::parse_numbered_list;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn activity_list() -> impl Strategy<Value = Value> {
    prop::collection::vec(("[A-Za-z ]{0,30}", 0..100_000u64, any::<bool>()), 0..60).prop_map(|items| {
        Value::Array(
            items
                .into_iter()
                .map(|(name, id, private)| json!({ "id": id, "name": name, "private": private }))
                .collect(),
        )
    })
}

// Working-memory compaction
proptest! {
    #[test]
    fn test_context_put_round_trip(value in activity_list(), threshold in 64..4096usize) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = ContextStore::new(Arc::new(MemoryBulkStore::new()), threshold);
            let size = serde_json::to_vec(&value).unwrap().len();
            let stored = ctx.put("(0,0)", value.clone()).await.unwrap();

            if size < threshold {
                prop_assert_eq!(&stored, &StoredValue::Inline(value.clone()));
            } else {
                let reference = stored.reference().expect("large value is offloaded");
                prop_assert_eq!(reference.size_bytes, size);
                prop_assert_eq!(ctx.resolve(reference).await.unwrap(), value.clone());
            }
            prop_assert_eq!(ctx.get_full("(0,0)").await.unwrap(), Some(value));
            Ok(())
        })?;
    }
}

// Engine limits survive a TOML round-trip
proptest! {
    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        max_depth in 1..=10usize,
        max_dendrites in 1..=500usize,
        max_attempts in 1..=10usize,
        threshold in 64..=1_000_000usize,
        concurrency in 1..=32usize,
        margin in 0.0..=10.0f64,
        corrective in any::<bool>(),
    ) {
        let mut config = Config::default();
        config.core.log_level = log_level;
        config.engine.max_depth = max_depth;
        config.engine.max_dendrites = max_dendrites;
        config.engine.max_attempts = max_attempts;
        config.engine.compaction_threshold_bytes = threshold;
        config.engine.dendrite_concurrency = concurrency;
        config.engine.selection_margin = margin;
        config.engine.allow_corrective_pass = corrective;

        let toml_string = toml::to_string(&config).expect("Failed to serialize Config to string");
        let parsed = Config::from_toml_str(&toml_string).expect("Failed to load serialized Config");

        prop_assert_eq!(config.core.log_level, parsed.core.log_level);
        prop_assert_eq!(config.engine.max_depth, parsed.engine.max_depth);
        prop_assert_eq!(config.engine.max_dendrites, parsed.engine.max_dendrites);
        prop_assert_eq!(config.engine.max_attempts, parsed.engine.max_attempts);
        prop_assert_eq!(config.engine.compaction_threshold_bytes, parsed.engine.compaction_threshold_bytes);
        prop_assert_eq!(config.engine.dendrite_concurrency, parsed.engine.dendrite_concurrency);
        prop_assert_eq!(config.engine.selection_margin, parsed.engine.selection_margin);
        prop_assert_eq!(config.engine.allow_corrective_pass, parsed.engine.allow_corrective_pass);
    }
}

// Step deduplication
proptest! {
    #[test]
    fn test_dedup_is_idempotent_and_bounded(
        steps in prop::collection::vec("[A-Za-z ]{0,12}[.!?]?", 0..12),
        max in 1..8usize,
    ) {
        let once = dedup_descriptions(steps.clone(), max);
        let twice = dedup_descriptions(once.clone(), max);

        prop_assert!(once.len() <= max);
        prop_assert_eq!(&once, &twice);

        let mut keys: Vec<String> = once.iter().map(|s| normalize(s)).collect();
        prop_assert!(keys.iter().all(|k| !k.is_empty()));
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), once.len());
    }

    #[test]
    fn test_numbered_list_recovers_items(
        items in prop::collection::vec("[A-Za-z][A-Za-z ]{0,20}[A-Za-z]", 1..6),
    ) {
        let reply = items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, item))
            .collect::<Vec<_>>()
            .join("\n");
        prop_assert_eq!(parse_numbered_list(&reply), items);
    }
}

// Context key scoping
proptest! {
    #[test]
    fn test_dendrite_sees_ancestors_not_siblings(
        index in 0..10usize,
        slot in 0..20usize,
        other in 0..20usize,
        child_index in 0..10usize,
    ) {
        prop_assume!(slot != other);
        let root = KeyScope::root();
        let parent_key = root.neuron_key(NeuronId::new(0, index));
        let child = root.child(&parent_key, slot, None);
        let sibling = root.child(&parent_key, other, None);

        let own = child.neuron_key(NeuronId::new(1, child_index));
        let theirs = sibling.neuron_key(NeuronId::new(1, child_index));

        prop_assert!(child.sees(&parent_key));
        prop_assert!(child.sees(&own));
        prop_assert!(!child.sees(&theirs));
        prop_assert!(root.sees(&parent_key));
        prop_assert!(!root.sees(&own));

        let grandchild = child.child(&own, 0, None);
        prop_assert!(grandchild.sees(&own));
        prop_assert!(grandchild.sees(&parent_key));
        prop_assert!(!grandchild.sees(&theirs));
    }

    #[test]
    fn test_only_the_active_item_is_visible(slot in 0..20usize, other in 0..20usize) {
        prop_assume!(slot != other);
        let root = KeyScope::root();
        let item_key = root.transient_key(NeuronId::new(1, slot));
        let other_key = root.transient_key(NeuronId::new(1, other));
        let child = root.child("(0,0)", slot, Some(item_key.clone()));

        prop_assert!(child.sees(&item_key));
        prop_assert!(!child.sees(&other_key));
        prop_assert!(!root.sees(&item_key));
    }
}

// Bounded views and item goals
proptest! {
    #[test]
    fn test_bounded_view_keeps_small_values(
        names in prop::collection::vec("[a-z]{1,10}", 0..40),
        max in 16..2048usize,
    ) {
        let value = Value::Array(names.iter().map(|n| json!({ "name": n })).collect());
        let size = serde_json::to_vec(&value).unwrap().len();
        let view = bounded_view(&value, max);

        if size <= max {
            prop_assert_eq!(view, value);
        } else {
            prop_assert_eq!(&view["type"], &json!("list"));
            prop_assert_eq!(&view["count"], &json!(names.len()));
        }
    }

    #[test]
    fn test_item_goal_names_the_item(id in 1..u64::MAX, name in "[A-Za-z ]{1,20}") {
        let by_id = json!({ "id": id, "name": name.clone() });
        let goal = render_item_goal("Get the kudos givers for activity {item}", &by_id);
        prop_assert_eq!(goal, format!("Get the kudos givers for activity {}", id));

        let by_name = json!({ "name": name.clone() });
        prop_assert_eq!(item_label(&by_name), name);
    }
}
