//! # conductor-policy
//!
//! The static policy tables of the conductor runtime, loaded from TOML.
//!
//! ## Overview
//!
//! This crate provides [`TomlPolicyCatalog`], which implements the
//! [`PolicySource`](conductor_core::traits::PolicySource) trait. A catalog
//! holds agent-type policies, workflow definitions, communication limits,
//! SLA targets, monitoring thresholds and feature flags. Every table and field
//! is optional; omitted values take the built-in defaults.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use conductor_policy::TomlPolicyCatalog;
//!
//! let catalog = TomlPolicyCatalog::from_file(Path::new("policies/conductor.toml"))?;
//! // Pass `Arc::new(catalog)` to `conductor_core::Runtime::new(...)`.
//! ```

pub mod catalog;
pub mod document;

pub use catalog::TomlPolicyCatalog;

#[cfg(test)]
mod tests {
    use conductor_contracts::{error::ConductorError, policy::{Stage, StageStep}};
    use conductor_core::traits::PolicySource;

    use crate::TomlPolicyCatalog;

    // ── Built-in catalog ──────────────────────────────────────────────────────

    #[test]
    fn builtin_catalog_loads() {
        let catalog = TomlPolicyCatalog::builtin().unwrap();

        assert_eq!(
            catalog.agent_types(),
            vec![
                "ai_engineering",
                "business_intelligence",
                "market_validation",
                "product_architect",
                "user_experience",
            ]
        );
        assert_eq!(catalog.workflows().len(), 4);
    }

    #[test]
    fn builtin_agent_policies_match_constants() {
        let catalog = TomlPolicyCatalog::builtin().unwrap();

        let ae = catalog.agent_policy("ai_engineering").unwrap();
        assert_eq!(ae.id, "ai_engineering_001");
        assert_eq!(ae.queue, "agent_ai_engineering");
        assert_eq!(ae.timeout_seconds, 600);
        assert_eq!(ae.retry_policy.max_retries, 5);
        assert_eq!(ae.retry_policy.retry_delay_seconds, 60);
        assert_eq!(ae.retry_policy.max_delay_seconds, 600);

        let mv = catalog.agent_policy("market_validation").unwrap();
        assert_eq!(mv.capabilities.len(), 5);
        assert!(mv.capabilities.contains(&"validate_hypothesis".to_string()));
    }

    #[test]
    fn builtin_strategic_loop_has_parallel_tail() {
        let catalog = TomlPolicyCatalog::builtin().unwrap();
        let def = catalog.workflow("full_strategic_loop").unwrap();

        assert_eq!(def.timeout_seconds, Some(3600));
        assert_eq!(
            def.stages().last(),
            Some(&Stage::Parallel(vec![
                StageStep::new(3, "business_intelligence"),
                StageStep::new(4, "user_experience")
            ]))
        );
    }

    #[test]
    fn builtin_limits_sla_and_monitoring() {
        let catalog = TomlPolicyCatalog::builtin().unwrap();

        assert_eq!(catalog.limits().message_ttl_seconds, 3600);
        assert_eq!(catalog.limits().max_message_size_bytes, 1_048_576);
        assert_eq!(catalog.limits().priority_levels["high"], 8);
        assert_eq!(catalog.limits().event_retention_seconds, 604_800);

        assert_eq!(catalog.sla().message_processing_seconds["user_experience"], 20.0);
        assert_eq!(catalog.sla().workflow_completion_seconds["full_strategic_loop"], 2400.0);

        assert_eq!(catalog.monitoring().health_check_interval_seconds, 30);
        assert_eq!(catalog.monitoring().alert_thresholds.latency_p95_ms, 2000);
    }

    #[test]
    fn builtin_catalog_ships_disabled() {
        let catalog = TomlPolicyCatalog::builtin().unwrap();
        assert!(!catalog.features().enable_multi_agent_system);
        assert!(catalog.features().debug_mode);
    }

    #[test]
    fn with_feature_overrides_flags() {
        let catalog = TomlPolicyCatalog::builtin()
            .unwrap()
            .with_feature("enable_multi_agent_system", true)
            .unwrap();
        assert!(catalog.features().enable_multi_agent_system);

        let err = TomlPolicyCatalog::builtin().unwrap().with_feature("enable_warp", true);
        assert!(matches!(err, Err(ConductorError::ConfigError { .. })));
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn empty_document_takes_defaults() {
        let catalog = TomlPolicyCatalog::from_toml_str("").unwrap();

        assert!(catalog.workflows().is_empty());
        assert_eq!(catalog.limits().message_ttl_seconds, 3600);
        assert_eq!(catalog.monitoring().metrics_interval_seconds, 60);
    }

    #[test]
    fn legacy_key_names_are_accepted() {
        let toml = r#"
            [agents.echo]
            id = "echo_001"
            name = "Echo"
            queue = "agent_echo"
            timeout = 45

            [agents.echo.retry_policy]
            max_retries = 2
            retry_delay = 5

            [communication_rules]
            message_ttl = 60
        "#;

        let catalog = TomlPolicyCatalog::from_toml_str(toml).unwrap();
        let echo = catalog.agent_policy("echo").unwrap();

        assert_eq!(echo.timeout_seconds, 45);
        assert_eq!(echo.retry_policy.retry_delay_seconds, 5);
        assert_eq!(catalog.limits().message_ttl_seconds, 60);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        match TomlPolicyCatalog::from_toml_str("[agents.echo\nqueue = ") {
            Err(ConductorError::ConfigError { reason }) => {
                assert!(reason.contains("failed to parse"), "got: {reason}");
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = TomlPolicyCatalog::from_file(std::path::Path::new("/nonexistent/catalog.toml"));
        assert!(matches!(result, Err(ConductorError::ConfigError { .. })));
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn parallel_group_outside_sequence_is_rejected() {
        let toml = r#"
            [workflows.bad]
            name = "Bad"
            agent_sequence = ["a", "b"]
            parallel_steps = [["b", "c"]]
        "#;

        match TomlPolicyCatalog::from_toml_str(toml) {
            Err(ConductorError::ConfigError { reason }) => assert!(reason.contains("'c'")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_priority_level_is_rejected() {
        let toml = r#"
            [communication.priority_levels]
            critical = 11
        "#;

        match TomlPolicyCatalog::from_toml_str(toml) {
            Err(ConductorError::ConfigError { reason }) => assert!(reason.contains("critical")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let toml = r#"
            [workflows.empty]
            name = "Empty"
            agent_sequence = []
        "#;
        assert!(TomlPolicyCatalog::from_toml_str(toml).is_err());
    }
}
