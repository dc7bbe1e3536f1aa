use super::money::Minor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type AttemptId = u64;

/// Why a transfer is currently not permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    NotFound,
    PaymentNotConfirmed,
    PaymentRefunded,
    AlreadyTransferred,
    TransferInProgress,
    DeliveryNotReached,
    NoPayoutAccount,
    PlaceholderPayoutAccount,
    MissingChargeReference,
}

impl IneligibleReason {
    /// Reasons that mean another caller already acted on the record.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            IneligibleReason::AlreadyTransferred | IneligibleReason::TransferInProgress
        )
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IneligibleReason::NotFound => "booking not found",
            IneligibleReason::PaymentNotConfirmed => "payment not confirmed",
            IneligibleReason::PaymentRefunded => "payment refunded",
            IneligibleReason::AlreadyTransferred => "transfer already processed",
            IneligibleReason::TransferInProgress => "transfer in progress",
            IneligibleReason::DeliveryNotReached => "delivery end not reached",
            IneligibleReason::NoPayoutAccount => "provider has no payout account",
            IneligibleReason::PlaceholderPayoutAccount => "payout account is a placeholder",
            IneligibleReason::MissingChargeReference => "no charge reference on record",
        };
        f.write_str(text)
    }
}

/// Answer of the transfer gate. Expected refusals are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferDecision {
    pub allowed: bool,
    pub reason: Option<IneligibleReason>,
}

impl TransferDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn blocked(reason: IneligibleReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    SessionCompletion,
    BundleSessionPayout,
    CancellationCompensation,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::SessionCompletion => "session_completion",
            TransferKind::BundleSessionPayout => "bundle_session_payout",
            TransferKind::CancellationCompensation => "cancellation_compensation",
        }
    }
}

/// Processor-side status of a transfer. Only this field of an attempt ever changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Paid => "paid",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum TransferTarget {
    Booking(u64),
    Bundle(u64),
}

impl fmt::Display for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferTarget::Booking(id) => write!(f, "booking:{}", id),
            TransferTarget::Bundle(id) => write!(f, "bundle:{}", id),
        }
    }
}

/// An attempt before the log assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransferAttempt {
    pub target: TransferTarget,
    pub amount_minor: Minor,
    pub processor_transfer_id: String,
    pub status: AttemptStatus,
    pub kind: TransferKind,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one transfer call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub id: AttemptId,
    pub target: TransferTarget,
    pub amount_minor: Minor,
    /// Processor transfer id, or a synthetic `failed_*` / `unconfirmed_*` marker.
    pub processor_transfer_id: String,
    pub status: AttemptStatus,
    pub kind: TransferKind,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl TransferAttempt {
    pub fn from_new(id: AttemptId, new: NewTransferAttempt) -> Self {
        Self {
            id,
            target: new.target,
            amount_minor: new.amount_minor,
            processor_transfer_id: new.processor_transfer_id,
            status: new.status,
            kind: new.kind,
            idempotency_key: new.idempotency_key,
            created_at: new.created_at,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.processor_transfer_id.starts_with(FAILED_MARKER)
            || self.processor_transfer_id.starts_with(UNCONFIRMED_MARKER)
    }
}

pub const FAILED_MARKER: &str = "failed_";
pub const UNCONFIRMED_MARKER: &str = "unconfirmed_";

/// What a processor charge reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeReference {
    Charge(String),
    /// A payment-intent style id; transfers need the underlying charge.
    PaymentIntent(String),
}

impl ChargeReference {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else if raw.starts_with("pi_") {
            Some(ChargeReference::PaymentIntent(raw.to_string()))
        } else {
            Some(ChargeReference::Charge(raw.to_string()))
        }
    }
}

/// Parameters of one transfer-to-connected-account call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount_minor: Minor,
    pub currency: String,
    pub destination: String,
    pub source_charge: String,
    pub transfer_group: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessorTransfer {
    pub id: String,
}

/// Outcome of an out-of-band check of a claimed-but-unconfirmed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResolution {
    Settled { transfer_id: String },
    NotSent,
}
