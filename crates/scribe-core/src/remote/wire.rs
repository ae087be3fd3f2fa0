//! Wire contracts for the platform API
//!
//! camelCase JSON, optionals defaulted so older service builds that omit
//! fields still parse.

use serde::{Deserialize, Serialize};

/// Generation call request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub identity_ref: String,
    pub prompt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Generation call response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,

    #[serde(default)]
    pub content: Option<String>,

    /// Authoritative remaining balance; absent on older service builds
    #[serde(default)]
    pub remaining_credits: Option<u32>,

    #[serde(default)]
    pub message: Option<String>,
}

/// Balance query request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRequest {
    pub identity_ref: String,
}

/// Balance query response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: u32,
}

/// Checkout-session creation request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub identity_ref: String,
    pub credit_type: String,
    pub quantity: u32,
    pub unit_price_minor_units: u64,
    pub line_item_label: String,
}

/// Checkout-session creation response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    #[serde(default)]
    pub redirect_url: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_response_with_authoritative_balance() {
        let json = r#"{"success":true,"content":"a post","remainingCredits":2}"#;
        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert_eq!(resp.content.as_deref(), Some("a post"));
        assert_eq!(resp.remaining_credits, Some(2));
    }

    #[test]
    fn test_generate_response_without_balance_figure() {
        let json = r#"{"success":true,"content":"a post"}"#;
        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.remaining_credits, None);
    }

    #[test]
    fn test_generate_request_camel_case() {
        let req = GenerateRequest {
            identity_ref: "user-1".into(),
            prompt: "hello".into(),
            template: None,
            params: serde_json::Map::new(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "identityRef": "user-1", "prompt": "hello" })
        );
    }

    #[test]
    fn test_checkout_response_error_shape() {
        let json = r#"{"error":"card declined"}"#;
        let resp: CheckoutSessionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.redirect_url, None);
        assert_eq!(resp.error.as_deref(), Some("card declined"));
    }
}
