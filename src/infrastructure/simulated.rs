use crate::domain::ports::PaymentProcessor;
use crate::domain::transfer::{ProcessorTransfer, TransferRequest};
use crate::error::ProcessorError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct SimulatedState {
    transfer_calls: usize,
    charge_lookups: usize,
    transfers: Vec<TransferRequest>,
    by_idempotency_key: HashMap<String, ProcessorTransfer>,
    scripted_failures: VecDeque<ProcessorError>,
    rejected_destinations: HashSet<String>,
}

/// Deterministic in-process stand-in for the payment processor.
///
/// Transfer ids are `tr_sim_<n>`, payment intents `pi_X` resolve to `ch_X`,
/// and repeated idempotency keys return the original transfer like the real
/// processor does. Failures and latency can be injected.
#[derive(Default, Clone)]
pub struct SimulatedProcessor {
    state: Arc<Mutex<SimulatedState>>,
    latency: Duration,
}

impl SimulatedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// The next call fails with `error`. Failures queue up in order.
    pub async fn fail_next(&self, error: ProcessorError) {
        self.state.lock().await.scripted_failures.push_back(error);
    }

    pub async fn reject_destination(&self, account_id: impl Into<String>) {
        self.state
            .lock()
            .await
            .rejected_destinations
            .insert(account_id.into());
    }

    /// Number of `create_transfer` invocations, successful or not.
    pub async fn transfer_calls(&self) -> usize {
        self.state.lock().await.transfer_calls
    }

    pub async fn charge_lookups(&self) -> usize {
        self.state.lock().await.charge_lookups
    }

    /// Transfers the processor actually created.
    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.state.lock().await.transfers.clone()
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn charge_for_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<String, ProcessorError> {
        tokio::time::sleep(self.latency).await;
        let mut state = self.state.lock().await;
        state.charge_lookups += 1;
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        payment_intent_id
            .strip_prefix("pi_")
            .map(|suffix| format!("ch_{}", suffix))
            .ok_or_else(|| ProcessorError::Rejected {
                code: "resource_missing".to_string(),
                message: format!("No such payment_intent: '{}'", payment_intent_id),
            })
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ProcessorTransfer, ProcessorError> {
        tokio::time::sleep(self.latency).await;
        let mut state = self.state.lock().await;
        state.transfer_calls += 1;
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        if state.rejected_destinations.contains(&request.destination) {
            return Err(ProcessorError::Rejected {
                code: "account_invalid".to_string(),
                message: format!("Destination {} cannot receive transfers", request.destination),
            });
        }
        if let Some(existing) = state.by_idempotency_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        let transfer = ProcessorTransfer {
            id: format!("tr_sim_{}", state.transfers.len() + 1),
        };
        state.transfers.push(request.clone());
        state
            .by_idempotency_key
            .insert(request.idempotency_key.clone(), transfer.clone());
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> TransferRequest {
        TransferRequest {
            amount_minor: 10_000,
            currency: "eur".into(),
            destination: "acct_1Nv".into(),
            source_charge: "ch_1".into(),
            transfer_group: "booking-1".into(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_reuses_transfer() {
        let processor = SimulatedProcessor::new();
        let first = processor.create_transfer(&request("k1")).await.unwrap();
        let again = processor.create_transfer(&request("k1")).await.unwrap();
        let other = processor.create_transfer(&request("k2")).await.unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(processor.transfer_calls().await, 3);
        assert_eq!(processor.transfers().await.len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_then_success() {
        let processor = SimulatedProcessor::new();
        processor
            .fail_next(ProcessorError::Unreachable("connection reset".into()))
            .await;
        assert!(processor.create_transfer(&request("k1")).await.is_err());
        assert!(processor.create_transfer(&request("k1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_payment_intent_resolution() {
        let processor = SimulatedProcessor::new();
        assert_eq!(
            processor.charge_for_payment_intent("pi_42").await.unwrap(),
            "ch_42"
        );
        assert!(processor.charge_for_payment_intent("xx_42").await.is_err());
    }
}
