//! # conductor-verify
//!
//! Payload validation for the conductor runtime.
//!
//! [`SchemaValidator`] implements `conductor_core::traits::PayloadValidator`.
//! Agents call it with the `input_schema` of the capability named like the
//! incoming message type before dispatch, and with its `output_schema` on the
//! response payload afterwards.
//!
//! ```rust,ignore
//! use conductor_verify::SchemaValidator;
//!
//! let agent = Agent::new("bi_agent_001", "business_intelligence")
//!     .with_validator(Arc::new(SchemaValidator::new()));
//! ```

pub mod schema;

pub use schema::SchemaValidator;

// ── Tests ─────────────────────────────────────────────────────────────────────
