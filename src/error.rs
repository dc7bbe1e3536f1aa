use crate::domain::transfer::IneligibleReason;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettlementError {
    /// Malformed amounts or wrong session/bundle linkage. Never retried.
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// A business-rule gate failed. Safe to re-check later.
    #[error("Not eligible for transfer: {0}")]
    EligibilityError(IneligibleReason),
    /// The processor was unreachable or rejected the call. The ledger is unchanged.
    #[error("Payment processor call failed: {0}")]
    ExternalCallError(#[from] ProcessorError),
    /// The ledger already moved past the state the caller expected.
    #[error("Ledger already advanced: {0}")]
    ConsistencyError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl SettlementError {
    /// True for outcomes a concurrent trigger should treat as a no-op.
    pub fn is_benign(&self) -> bool {
        matches!(self, SettlementError::ConsistencyError(_))
    }

    /// True when re-invoking the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::ExternalCallError(_) | SettlementError::EligibilityError(_)
        )
    }
}

/// Failure reported by the payment processor adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("rejected by processor ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("processor unreachable: {0}")]
    Unreachable(String),
    #[error("processor call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProcessorError {
    /// A timed-out call may still have landed on the processor side.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ProcessorError::Timeout(_))
    }
}

impl From<IneligibleReason> for SettlementError {
    fn from(reason: IneligibleReason) -> Self {
        if reason.is_state_conflict() {
            SettlementError::ConsistencyError(reason.to_string())
        } else {
            SettlementError::EligibilityError(reason)
        }
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SettlementError::ConsistencyError("done".into()).is_benign());
        assert!(!SettlementError::ValidationError("bad".into()).is_retryable());
        assert!(
            SettlementError::ExternalCallError(ProcessorError::Unreachable("dns".into()))
                .is_retryable()
        );
        assert!(ProcessorError::Timeout(Duration::from_secs(1)).is_ambiguous());
        assert!(
            !ProcessorError::Rejected {
                code: "balance_insufficient".into(),
                message: "no funds".into()
            }
            .is_ambiguous()
        );
    }

    #[test]
    fn test_reason_conversion() {
        assert!(SettlementError::from(IneligibleReason::AlreadyTransferred).is_benign());
        assert!(matches!(
            SettlementError::from(IneligibleReason::DeliveryNotReached),
            SettlementError::EligibilityError(IneligibleReason::DeliveryNotReached)
        ));
    }

    #[test]
    fn test_eligibility_message() {
        let err = SettlementError::EligibilityError(IneligibleReason::PaymentNotConfirmed);
        assert_eq!(
            err.to_string(),
            "Not eligible for transfer: payment not confirmed"
        );
    }
}
