//! Shared domain types for the generation pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to the signed-in user, as the remote services expect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRef(pub String);

impl IdentityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Input of a single generation request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInput {
    /// The user's prompt
    pub prompt: String,

    /// Template / content category to generate against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Auxiliary parameters forwarded verbatim to the service
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl GenerationInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            template: None,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A deferred generation request held by the single-slot queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub input: GenerationInput,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(input: GenerationInput) -> Self {
        Self {
            input,
            enqueued_at: Utc::now(),
        }
    }
}

/// Result payload of a successful generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReceipt {
    /// Generated content
    pub content: String,

    /// Authoritative remaining balance, when the service returned one
    pub remaining_credits: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_builder() {
        let input = GenerationInput::new("a post about rust")
            .with_template("blog")
            .with_param("tone", serde_json::json!("casual"));

        assert_eq!(input.prompt, "a post about rust");
        assert_eq!(input.template.as_deref(), Some("blog"));
        assert_eq!(input.params.get("tone"), Some(&serde_json::json!("casual")));
    }

    #[test]
    fn test_input_serializes_without_empty_fields() {
        let json = serde_json::to_value(GenerationInput::new("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "prompt": "hi" }));
    }
}
