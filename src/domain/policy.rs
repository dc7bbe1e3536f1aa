//! Bundle payout policies.
//!
//! Which policy is active is a product decision made in configuration. The
//! default releases the whole provider share on the first delivered session.

use super::bundle::{Bundle, BundleTransferStatus};
use super::money::Minor;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// The transfer a session completion should trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallmentPlan {
    pub amount_minor: Minor,
    pub next_status: BundleTransferStatus,
}

pub trait PayoutPolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Plans the installment for the next completion of `bundle`, or `None` for no transfer.
    fn plan(&self, bundle: &Bundle) -> Option<InstallmentPlan>;
}

pub type PayoutPolicyRef = Arc<dyn PayoutPolicy>;

/// One transfer per bundle, issued when the first session is delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullOnFirstSession;

impl PayoutPolicy for FullOnFirstSession {
    fn name(&self) -> &'static str {
        "full_on_first_session"
    }

    fn plan(&self, bundle: &Bundle) -> Option<InstallmentPlan> {
        if bundle.transfer_status != BundleTransferStatus::Pending {
            return None;
        }
        Some(InstallmentPlan {
            amount_minor: bundle.provider_net_minor - bundle.transferred_minor,
            next_status: BundleTransferStatus::FullyTransferred,
        })
    }
}

/// Each completed session releases its share; the final one also carries the remainder.
///
/// Cancelled sessions count toward "final", so the remainder is still
/// released when the bundle ends early.
#[derive(Debug, Clone, Copy, Default)]
pub struct FractionalPerSession;

impl PayoutPolicy for FractionalPerSession {
    fn name(&self) -> &'static str {
        "fractional_per_session"
    }

    fn plan(&self, bundle: &Bundle) -> Option<InstallmentPlan> {
        if bundle.transfer_status == BundleTransferStatus::FullyTransferred {
            return None;
        }
        let is_last = bundle.sessions_left() <= 1;
        if is_last {
            let outstanding = bundle.provider_net_minor - bundle.transferred_minor;
            return (outstanding > 0).then_some(InstallmentPlan {
                amount_minor: outstanding,
                next_status: BundleTransferStatus::FullyTransferred,
            });
        }
        (bundle.per_session_payout_minor > 0).then_some(InstallmentPlan {
            amount_minor: bundle.per_session_payout_minor,
            next_status: BundleTransferStatus::PartiallyTransferred,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutPolicyKind {
    #[default]
    FullOnFirstSession,
    FractionalPerSession,
}

impl PayoutPolicyKind {
    pub fn build(self) -> PayoutPolicyRef {
        match self {
            PayoutPolicyKind::FullOnFirstSession => Arc::new(FullOnFirstSession),
            PayoutPolicyKind::FractionalPerSession => Arc::new(FractionalPerSession),
        }
    }
}
