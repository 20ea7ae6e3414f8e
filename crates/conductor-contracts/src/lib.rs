//! # conductor-contracts
//!
//! Shared types for the conductor multi-agent runtime: the message protocol,
//! agent lifecycle states, capability descriptors, the static policy tables
//! and the unified error type.
//!
//! All crates in the workspace import from here. No runtime logic lives in
//! this crate, only data definitions and pure checks on them.

pub mod agent;
pub mod capability;
pub mod error;
pub mod message;
pub mod policy;
pub mod verify;
pub mod workflow;

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;
    use agent::{AgentId, AgentState};
    use capability::{CapabilityDescriptor, CapabilitySet};
    use error::ConductorError;
    use message::{payload_from_json, CorrelationId, Message, Priority};
    use policy::{CommunicationLimits, FeatureFlags, Stage, StageStep, WorkflowDefinition};

    fn text_payload(text: &str) -> message::Payload {
        payload_from_json(json!({ "text": text })).unwrap()
    }

    // ── Message ──────────────────────────────────────────────────────────────

    #[test]
    fn message_new_defaults() {
        let msg = Message::new("orchestrator", "a1", "workflow_task", text_payload("hi"));

        assert_eq!(msg.source_agent(), &AgentId::new("orchestrator"));
        assert_eq!(msg.target_agent(), &AgentId::new("a1"));
        assert_eq!(msg.message_type(), "workflow_task");
        assert_eq!(msg.priority(), Priority::NORMAL);
        assert!(msg.correlation_id().is_none());
    }

    #[test]
    fn message_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..100)
            .map(|_| Message::new("a", "b", "t", text_payload("x")).id().to_string())
            .collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn reply_is_a_new_message_addressed_back() {
        let correlation = CorrelationId::new();
        let request = Message::new("orchestrator", "a1", "workflow_task", text_payload("hi"))
            .with_correlation(correlation)
            .with_priority(Priority::HIGH);

        let reply = request.reply("workflow_result", text_payload("HI"));

        assert_ne!(reply.id(), request.id());
        assert_eq!(reply.source_agent(), &AgentId::new("a1"));
        assert_eq!(reply.target_agent(), &AgentId::new("orchestrator"));
        assert_eq!(reply.correlation_id(), Some(correlation));
        assert_eq!(reply.priority(), Priority::HIGH);

        // The request is untouched.
        assert_eq!(request.payload(), &text_payload("hi"));
    }

    #[test]
    fn wire_shape_uses_spec_field_names() {
        let msg = Message::new("a", "b", "ping", text_payload("x")).with_priority(Priority::CRITICAL);
        let wire = serde_json::to_value(&msg).unwrap();

        for field in [
            "id",
            "source_agent",
            "target_agent",
            "message_type",
            "payload",
            "correlation_id",
            "timestamp",
            "priority",
        ] {
            assert!(wire.get(field).is_some(), "wire shape missing '{field}'");
        }
        assert_eq!(wire["priority"], json!(10));
        assert_eq!(wire["correlation_id"], json!(null));

        let decoded: Message = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn deserializing_out_of_range_priority_fails() {
        let msg = Message::new("a", "b", "ping", text_payload("x"));
        let mut wire = serde_json::to_value(&msg).unwrap();
        wire["priority"] = json!(11);

        assert!(serde_json::from_value::<Message>(wire).is_err());
    }

    #[test]
    fn expiry_uses_creation_time() {
        let msg = Message::new("a", "b", "ping", text_payload("x"));

        assert!(!msg.is_expired(3600, Utc::now()));
        assert!(msg.is_expired(3600, Utc::now() + Duration::seconds(3601)));
    }

    #[test]
    fn payload_from_json_rejects_non_objects() {
        match payload_from_json(json!([1, 2, 3])) {
            Err(ConductorError::InvalidMessage { reason }) => {
                assert!(reason.contains("JSON object"));
            }
            other => panic!("expected InvalidMessage, got {:?}", other),
        }
    }

    // ── Priority ─────────────────────────────────────────────────────────────

    #[test]
    fn priority_bounds() {
        assert!(Priority::new(1).is_ok());
        assert!(Priority::new(10).is_ok());
        assert_eq!(
            Priority::new(0),
            Err(ConductorError::InvalidPriority { value: 0 })
        );
        assert_eq!(
            Priority::new(11),
            Err(ConductorError::InvalidPriority { value: 11 })
        );
    }

    #[test]
    fn priority_from_named_level() {
        let limits = CommunicationLimits::default();
        assert_eq!(Priority::from_level("critical", &limits).unwrap(), Priority::CRITICAL);
        assert_eq!(Priority::from_level("low", &limits).unwrap(), Priority::LOW);
        assert!(matches!(
            Priority::from_level("urgent", &limits),
            Err(ConductorError::ConfigError { .. })
        ));
    }

    // ── AgentState ───────────────────────────────────────────────────────────

    #[test]
    fn lifecycle_legal_edges() {
        use AgentState::*;

        assert!(Initializing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Error));
        assert!(Processing.can_transition_to(Error));
        assert!(Error.can_transition_to(Initializing));
        for state in [Initializing, Ready, Processing, Waiting, Error] {
            assert!(state.can_transition_to(Terminated), "{state} -> terminated");
        }
    }

    #[test]
    fn lifecycle_illegal_edges() {
        use AgentState::*;

        assert!(!Initializing.can_transition_to(Processing));
        assert!(!Ready.can_transition_to(Initializing));
        assert!(!Error.can_transition_to(Ready));
        assert!(!Waiting.can_transition_to(Ready));
        for state in [Initializing, Ready, Processing, Waiting, Error, Terminated] {
            assert!(!Terminated.can_transition_to(state), "terminated -> {state}");
        }
    }

    #[test]
    fn agent_state_serializes_lowercase() {
        assert_eq!(serde_json::to_value(AgentState::Ready).unwrap(), json!("ready"));
        assert_eq!(AgentState::Terminated.to_string(), "terminated");
    }

    // ── CapabilitySet ────────────────────────────────────────────────────────

    #[test]
    fn capability_set_preserves_order_and_finds_latest() {
        let mut caps = CapabilitySet::default();
        caps.add(CapabilityDescriptor::new("validate_hypothesis", "v1"));
        caps.add(CapabilityDescriptor::new("competitive_analysis", "scan"));
        caps.add(CapabilityDescriptor::new("validate_hypothesis", "v2"));

        assert_eq!(
            caps.names(),
            vec!["validate_hypothesis", "competitive_analysis", "validate_hypothesis"]
        );
        assert_eq!(caps.find("validate_hypothesis").unwrap().description, "v2");
        assert!(caps.find("missing").is_none());
    }

    // ── WorkflowDefinition ───────────────────────────────────────────────────

    fn strategic_loop() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "Full Strategic Loop".to_string(),
            description: String::new(),
            agent_sequence: ["mv", "pa", "ae", "bi", "ux"].iter().map(|s| s.to_string()).collect(),
            timeout_seconds: Some(3600),
            parallel_steps: vec![vec!["bi".to_string(), "ux".to_string()]],
        }
    }

    #[test]
    fn stages_group_parallel_members_at_first_position() {
        let stages = strategic_loop().stages();

        assert_eq!(
            stages,
            vec![
                Stage::Sequential(StageStep::new(0, "mv")),
                Stage::Sequential(StageStep::new(1, "pa")),
                Stage::Sequential(StageStep::new(2, "ae")),
                Stage::Parallel(vec![StageStep::new(3, "bi"), StageStep::new(4, "ux")]),
            ]
        );
    }

    #[test]
    fn sequential_definition_has_one_stage_per_step() {
        let def = WorkflowDefinition::sequential("w1", vec!["a1".to_string(), "a2".to_string()]);
        assert_eq!(def.stages().len(), 2);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn repeated_ungrouped_step_keeps_every_occurrence() {
        let def = WorkflowDefinition {
            parallel_steps: vec![vec!["bi".to_string(), "ux".to_string()]],
            ..WorkflowDefinition::sequential(
                "w",
                ["a1", "a1", "bi", "ux", "a1"].iter().map(|s| s.to_string()).collect(),
            )
        };
        assert!(def.validate().is_ok());

        assert_eq!(
            def.stages(),
            vec![
                Stage::Sequential(StageStep::new(0, "a1")),
                Stage::Sequential(StageStep::new(1, "a1")),
                Stage::Parallel(vec![StageStep::new(2, "bi"), StageStep::new(3, "ux")]),
                Stage::Sequential(StageStep::new(4, "a1")),
            ]
        );
    }

    #[test]
    fn group_after_its_first_member_keeps_sequence_positions() {
        let def = WorkflowDefinition {
            parallel_steps: vec![vec!["c".to_string(), "a".to_string()]],
            ..WorkflowDefinition::sequential("w", ["a", "b", "c"].iter().map(|s| s.to_string()).collect())
        };

        assert_eq!(
            def.stages(),
            vec![
                Stage::Parallel(vec![StageStep::new(0, "a"), StageStep::new(2, "c")]),
                Stage::Sequential(StageStep::new(1, "b")),
            ]
        );
    }

    #[test]
    fn validate_rejects_grouped_step_that_repeats() {
        let def = WorkflowDefinition {
            parallel_steps: vec![vec!["a1".to_string(), "a2".to_string()]],
            ..WorkflowDefinition::sequential("w", ["a1", "a2", "a1"].iter().map(|s| s.to_string()).collect())
        };

        match def.validate() {
            Err(ConductorError::ConfigError { reason }) => assert!(reason.contains("appears 2 times")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_group_member_outside_sequence() {
        let mut def = strategic_loop();
        def.parallel_steps = vec![vec!["bi".to_string(), "legal".to_string()]];

        match def.validate() {
            Err(ConductorError::ConfigError { reason }) => assert!(reason.contains("legal")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_overlapping_groups() {
        let mut def = strategic_loop();
        def.parallel_steps = vec![
            vec!["bi".to_string(), "ux".to_string()],
            vec!["ae".to_string(), "ux".to_string()],
        ];
        assert!(def.validate().is_err());
    }

    // ── FeatureFlags ─────────────────────────────────────────────────────────

    #[test]
    fn feature_flags_default_to_disabled_subsystem() {
        let flags = FeatureFlags::default();
        assert!(!flags.is_enabled(FeatureFlags::MULTI_AGENT_SYSTEM));
        assert!(flags.is_enabled("debug_mode"));
        assert!(!flags.is_enabled("no_such_flag"));
    }

    #[test]
    fn feature_flags_set_by_name() {
        let mut flags = FeatureFlags::default();
        flags.set(FeatureFlags::PARALLEL_WORKFLOWS, true).unwrap();
        assert!(flags.enable_parallel_workflows);
        assert!(flags.set("enable_teleport", true).is_err());
    }

    // ── ConductorError ───────────────────────────────────────────────────────

    #[test]
    fn transient_errors() {
        assert!(ConductorError::DeliveryFailed {
            message_id: "m".to_string(),
            reason: "closed".to_string(),
        }
        .is_transient());
        assert!(!ConductorError::UnknownWorkflow {
            workflow_id: "w".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn error_unknown_workflow_display() {
        let err = ConductorError::UnknownWorkflow {
            workflow_id: "missing_workflow".to_string(),
        };
        assert_eq!(err.to_string(), "unknown workflow: missing_workflow");
    }

    #[test]
    fn error_handler_failed_display() {
        let err = ConductorError::HandlerFailed {
            agent_id: "a2".to_string(),
            message_id: "m-1".to_string(),
            message_type: "workflow_task".to_string(),
            reason: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a2"));
        assert!(msg.contains("workflow_task"));
        assert!(msg.contains("boom"));
    }
}
