use crate::envelope::CloudEvent;
use anyhow::{anyhow, Result};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

const CLOUD_EVENT_SCHEMA: &str = include_str!("../../../contracts/events/cloudevent.json");

pub struct EventValidator {
    schema: JSONSchema,
}

impl EventValidator {
    pub fn new() -> Result<Self> {
        let schema_value: Value = serde_json::from_str(CLOUD_EVENT_SCHEMA)
            .map_err(|e| anyhow!("Failed to parse cloud event schema: {}", e))?;

        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| anyhow!("Failed to compile cloud event schema: {}", e))?;

        Ok(Self { schema })
    }

    pub fn validate(&self, event: &CloudEvent) -> Result<()> {
        let event_value = serde_json::to_value(event)
            .map_err(|e| anyhow!("Failed to serialize event for validation: {}", e))?;
        self.validate_json(&event_value)
    }

    pub fn validate_json(&self, event_json: &Value) -> Result<()> {
        let validation_result = self.schema.validate(event_json);

        if let Err(errors) = validation_result {
            let error_messages: Vec<String> = errors
                .map(|error| format!("{} at {}", error, error.instance_path))
                .collect();

            return Err(anyhow!(
                "Cloud event validation failed: {}",
                error_messages.join(", ")
            ));
        }

        Ok(())
    }
}

impl CloudEvent {
    pub fn validate(&self) -> Result<()> {
        let validator = EventValidator::new()?;
        validator.validate(self)
    }

    pub fn validate_with(&self, validator: &EventValidator) -> Result<()> {
        validator.validate(self)
    }
}
