//! reqwest-backed platform clients
//!
//! One client struct implements all three seams against the platform's JSON
//! API. Status mapping: 402 is the explicit payment-required signal, 401 on
//! the balance endpoint rejects the identity, any transport error stays a
//! transport error so the orchestrator can treat it per policy.

use super::wire::{
    BalanceRequest, BalanceResponse, CheckoutSessionRequest, CheckoutSessionResponse,
    GenerateRequest, GenerateResponse,
};
use super::{
    BalanceCallError, BalanceClient, CheckoutCallError, CheckoutClient, CheckoutRequest,
    CheckoutSession, GenerationCallError, GenerationClient,
};
use crate::types::{GenerationInput, GenerationReceipt, IdentityRef};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// HTTP client for the platform API.
pub struct HttpPlatformClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPlatformClient {
    /// Build a client for `base_url` with a per-call timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl GenerationClient for HttpPlatformClient {
    async fn generate(
        &self,
        identity: &IdentityRef,
        input: &GenerationInput,
    ) -> Result<GenerationReceipt, GenerationCallError> {
        let body = GenerateRequest {
            identity_ref: identity.as_str().to_string(),
            prompt: input.prompt.clone(),
            template: input.template.clone(),
            params: input.params.clone(),
        };

        tracing::debug!(endpoint = "/api/generate", "Issuing generation call");

        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationCallError::Transport {
                message: e.to_string(),
            })?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            return Err(GenerationCallError::PaymentRequired);
        }

        if !response.status().is_success() {
            return Err(GenerationCallError::Service {
                message: format!("service returned {}", response.status()),
            });
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| GenerationCallError::Transport {
                    message: e.to_string(),
                })?;

        if !parsed.success {
            return Err(GenerationCallError::Service {
                message: parsed
                    .message
                    .unwrap_or_else(|| "generation refused".to_string()),
            });
        }

        let content = parsed.content.ok_or_else(|| GenerationCallError::Service {
            message: "service reported success without content".to_string(),
        })?;

        Ok(GenerationReceipt {
            content,
            remaining_credits: parsed.remaining_credits,
        })
    }
}

#[async_trait]
impl BalanceClient for HttpPlatformClient {
    async fn fetch_balance(&self, identity: &IdentityRef) -> Result<u32, BalanceCallError> {
        let body = BalanceRequest {
            identity_ref: identity.as_str().to_string(),
        };

        let response = self
            .http
            .post(self.endpoint("/api/credits/balance"))
            .json(&body)
            .send()
            .await
            .map_err(|e| BalanceCallError::Transport {
                message: e.to_string(),
            })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(BalanceCallError::NotAuthenticated);
        }

        if !response.status().is_success() {
            return Err(BalanceCallError::Transport {
                message: format!("balance service returned {}", response.status()),
            });
        }

        let parsed: BalanceResponse =
            response
                .json()
                .await
                .map_err(|e| BalanceCallError::Transport {
                    message: e.to_string(),
                })?;

        Ok(parsed.balance)
    }
}

#[async_trait]
impl CheckoutClient for HttpPlatformClient {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutCallError> {
        let body = CheckoutSessionRequest {
            identity_ref: request.identity.as_str().to_string(),
            credit_type: request.credit_type.clone(),
            quantity: request.quantity,
            unit_price_minor_units: request.unit_price_minor_units,
            line_item_label: request.line_item_label.clone(),
        };

        tracing::info!(
            credit_type = %request.credit_type,
            quantity = request.quantity,
            "Requesting checkout session"
        );

        let response = self
            .http
            .post(self.endpoint("/api/checkout/session"))
            .json(&body)
            .send()
            .await
            .map_err(|e| CheckoutCallError {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CheckoutCallError {
                message: format!("checkout service returned {}", response.status()),
            });
        }

        let parsed: CheckoutSessionResponse =
            response.json().await.map_err(|e| CheckoutCallError {
                message: e.to_string(),
            })?;

        if let Some(error) = parsed.error {
            return Err(CheckoutCallError { message: error });
        }

        let redirect_url = parsed.redirect_url.ok_or_else(|| CheckoutCallError {
            message: "checkout session missing redirect target".to_string(),
        })?;

        Ok(CheckoutSession { redirect_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client =
            HttpPlatformClient::new("https://api.example.com/", Duration::from_secs(10)).unwrap();
        assert_eq!(
            client.endpoint("/api/generate"),
            "https://api.example.com/api/generate"
        );
    }
}
