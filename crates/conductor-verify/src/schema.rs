//! `SchemaValidator`: the `PayloadValidator` backed by the `jsonschema` crate.
//!
//! Capability schemas are static, so each distinct schema document is
//! compiled once and the compiled validator is reused for every later
//! message.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use serde_json::Value;
use tracing::{debug, warn};

use conductor_contracts::{
    error::ConductorResult,
    message::Payload,
    verify::{ValidationFailure, ValidationReport},
};
use conductor_core::traits::PayloadValidator;

#[derive(Default)]
pub struct SchemaValidator {
    /// Compiled validators keyed by the schema's compact JSON text.
    compiled: Mutex<HashMap<String, Arc<jsonschema::Validator>>>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct schemas compiled so far.
    pub fn cached_schemas(&self) -> usize {
        self.compiled.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn compile(&self, schema: &Value) -> Result<Arc<jsonschema::Validator>, String> {
        let key = schema.to_string();
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(validator) = compiled.get(&key) {
            return Ok(validator.clone());
        }
        let validator = Arc::new(jsonschema::validator_for(schema).map_err(|e| e.to_string())?);
        compiled.insert(key, validator.clone());
        Ok(validator)
    }
}

impl PayloadValidator for SchemaValidator {
    /// Collect every violation, not only the first.
    ///
    /// A schema that does not compile is reported as a single failure at the
    /// payload root so the message is rejected rather than let through.
    fn validate(&self, payload: &Payload, schema: &Value) -> ConductorResult<ValidationReport> {
        if schema.is_null() {
            return Ok(ValidationReport::pass());
        }

        let validator = match self.compile(schema) {
            Ok(validator) => validator,
            Err(reason) => {
                let message = format!("invalid JSON Schema document: {reason}");
                warn!(%message, "schema compilation failure");
                return Ok(ValidationReport::from_failures(vec![ValidationFailure {
                    path: String::new(),
                    message,
                }]));
            }
        };

        let instance = Value::Object(payload.clone());
        let failures: Vec<ValidationFailure> = validator
            .iter_errors(&instance)
            .map(|error| ValidationFailure {
                path: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect();

        for failure in &failures {
            warn!(path = %failure.path, message = %failure.message, "payload schema violation");
        }
        debug!(failure_count = failures.len(), "payload validated");

        Ok(ValidationReport::from_failures(failures))
    }
}
