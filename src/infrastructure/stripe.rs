use crate::domain::ports::PaymentProcessor;
use crate::domain::transfer::{ProcessorTransfer, TransferRequest};
use crate::error::{ProcessorError, Result, SettlementError};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

/// Payment processor adapter speaking the Stripe REST API.
#[derive(Clone)]
pub struct StripeProcessor {
    client: Client,
    api_base: String,
    secret_key: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct PaymentIntentBody {
    latest_charge: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

impl StripeProcessor {
    pub fn new(api_base: &str, secret_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SettlementError::InternalError(Box::new(e)))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
            timeout,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> ProcessorError {
        if error.is_timeout() {
            ProcessorError::Timeout(self.timeout)
        } else {
            ProcessorError::Unreachable(error.to_string())
        }
    }

    async fn rejection(response: Response) -> ProcessorError {
        let status = response.status();
        if status.is_server_error() {
            return ProcessorError::Unreachable(format!("processor returned {}", status));
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => ProcessorError::Rejected {
                code: body
                    .error
                    .code
                    .or(body.error.kind)
                    .unwrap_or_else(|| status.as_u16().to_string()),
                message: body.error.message.unwrap_or_default(),
            },
            Err(_) => ProcessorError::Rejected {
                code: status.as_u16().to_string(),
                message: "unreadable error response".to_string(),
            },
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn charge_for_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> std::result::Result<String, ProcessorError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.api_base, payment_intent_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let body: PaymentIntentBody = response
            .json()
            .await
            .map_err(|e| ProcessorError::Unreachable(format!("malformed payment intent: {}", e)))?;
        body.latest_charge.ok_or_else(|| ProcessorError::Rejected {
            code: "charge_missing".to_string(),
            message: format!("payment intent {} has no charge", payment_intent_id),
        })
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> std::result::Result<ProcessorTransfer, ProcessorError> {
        let form = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("destination", request.destination.clone()),
            ("source_transaction", request.source_charge.clone()),
            ("transfer_group", request.transfer_group.clone()),
        ];
        let response = self
            .client
            .post(format!("{}/v1/transfers", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        response
            .json::<ProcessorTransfer>()
            .await
            .map_err(|e| ProcessorError::Unreachable(format!("malformed transfer: {}", e)))
    }
}
