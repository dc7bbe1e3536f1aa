use super::booking::{BookingId, PayerId, ProviderId};
use super::fees::BundleBreakdown;
use super::money::Minor;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type BundleId = u64;
pub type SessionId = u64;

const MINUTES_PER_HOUR: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleTransferStatus {
    Pending,
    PartiallyTransferred,
    FullyTransferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

/// An in-flight installment owned by one session completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutClaim {
    pub session_id: SessionId,
    pub duration_minutes: i64,
    pub amount_minor: Minor,
    pub from_status: BundleTransferStatus,
    pub next_status: BundleTransferStatus,
    pub claimed_at: DateTime<Utc>,
}

/// A multi-session package paid upfront and consumed over several sessions.
///
/// Hours are tracked as whole minutes so that deductions stay exact;
/// `total_hours` and `remaining_hours` are derived views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub provider_id: ProviderId,
    pub payer_id: PayerId,
    pub provider_net_minor: Minor,
    pub service_fee_minor: Minor,
    pub processing_fee_estimate_minor: Minor,
    pub platform_margin_minor: Minor,
    pub total_charged_minor: Minor,
    pub per_session_payout_minor: Minor,
    pub payout_remainder_minor: Minor,
    pub total_minutes: i64,
    pub remaining_minutes: i64,
    pub sessions_completed_count: u32,
    /// Cancelled sessions forfeit their slot.
    #[serde(default)]
    pub sessions_cancelled_count: u32,
    pub sessions_total_count: u32,
    pub transfer_status: BundleTransferStatus,
    pub transferred_minor: Minor,
    pub final_transfer_reference: Option<String>,
    pub charge_reference: Option<String>,
    pub payout_claim: Option<PayoutClaim>,
}

impl Bundle {
    pub fn new(
        id: BundleId,
        provider_id: ProviderId,
        payer_id: PayerId,
        breakdown: &BundleBreakdown,
        total_minutes: i64,
        charge_reference: Option<String>,
    ) -> Result<Self> {
        if total_minutes <= 0 {
            return Err(SettlementError::ValidationError(
                "Bundle must contain a positive number of hours".to_string(),
            ));
        }
        Ok(Self {
            id,
            provider_id,
            payer_id,
            provider_net_minor: breakdown.fees.provider_net_minor,
            service_fee_minor: breakdown.fees.service_fee_minor,
            processing_fee_estimate_minor: breakdown.fees.processing_fee_estimate_minor,
            platform_margin_minor: breakdown.fees.platform_margin_minor,
            total_charged_minor: breakdown.fees.total_charged_minor,
            per_session_payout_minor: breakdown.per_session_payout_minor,
            payout_remainder_minor: breakdown.payout_remainder_minor,
            total_minutes,
            remaining_minutes: total_minutes,
            sessions_completed_count: 0,
            sessions_cancelled_count: 0,
            sessions_total_count: breakdown.sessions_count,
            transfer_status: BundleTransferStatus::Pending,
            transferred_minor: 0,
            final_transfer_reference: None,
            charge_reference,
            payout_claim: None,
        })
    }

    pub fn total_hours(&self) -> Decimal {
        Decimal::from(self.total_minutes) / Decimal::from(MINUTES_PER_HOUR)
    }

    pub fn remaining_hours(&self) -> Decimal {
        Decimal::from(self.remaining_minutes) / Decimal::from(MINUTES_PER_HOUR)
    }

    pub fn deducted_minutes(&self) -> i64 {
        self.total_minutes - self.remaining_minutes
    }

    /// Session slots neither completed nor cancelled.
    pub fn sessions_left(&self) -> u32 {
        self.sessions_total_count
            .saturating_sub(self.sessions_completed_count + self.sessions_cancelled_count)
    }

    /// Everything a completion needs, checked without mutating anything.
    pub fn check_completion(&self, session: &BundleSession, duration_minutes: i64) -> Result<()> {
        if session.bundle_id != self.id {
            return Err(SettlementError::ValidationError(format!(
                "session {} does not belong to bundle {}",
                session.id, self.id
            )));
        }
        match session.status {
            SessionStatus::Scheduled => {}
            SessionStatus::Completed => {
                return Err(SettlementError::ConsistencyError(format!(
                    "session {} already completed",
                    session.id
                )));
            }
            SessionStatus::Cancelled => {
                return Err(SettlementError::ValidationError(format!(
                    "session {} was cancelled",
                    session.id
                )));
            }
        }
        if duration_minutes <= 0 {
            return Err(SettlementError::ValidationError(format!(
                "Session duration must be positive, got {} minutes",
                duration_minutes
            )));
        }
        if duration_minutes > self.remaining_minutes {
            return Err(SettlementError::ValidationError(format!(
                "Session of {} minutes exceeds the {} remaining hours of bundle {}",
                duration_minutes,
                self.remaining_hours(),
                self.id
            )));
        }
        if self.sessions_left() == 0 {
            return Err(SettlementError::ValidationError(format!(
                "bundle {} has no sessions left",
                self.id
            )));
        }
        if let Some(claim) = &self.payout_claim
            && claim.session_id != session.id
        {
            return Err(SettlementError::ConsistencyError(format!(
                "bundle {} has a payout in progress for session {}",
                self.id, claim.session_id
            )));
        }
        Ok(())
    }

    /// Deducts the session's hours and advances the counters. Never clamps.
    pub fn complete_session(
        &mut self,
        session: &mut BundleSession,
        duration_minutes: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_completion(session, duration_minutes)?;
        self.remaining_minutes -= duration_minutes;
        self.sessions_completed_count += 1;
        session.status = SessionStatus::Completed;
        session.deducted_minutes = Some(duration_minutes);
        session.completed_at = Some(at);
        Ok(())
    }

    pub fn cancel_session(&mut self, session: &mut BundleSession) -> Result<()> {
        if session.bundle_id != self.id {
            return Err(SettlementError::ValidationError(format!(
                "session {} does not belong to bundle {}",
                session.id, self.id
            )));
        }
        if matches!(&self.payout_claim, Some(claim) if claim.session_id == session.id) {
            return Err(SettlementError::ConsistencyError(format!(
                "session {} has a payout in progress",
                session.id
            )));
        }
        session.cancel()?;
        self.sessions_cancelled_count += 1;
        Ok(())
    }

    pub fn claim_payout(&mut self, claim: PayoutClaim) -> Result<()> {
        if let Some(existing) = &self.payout_claim {
            return Err(SettlementError::ConsistencyError(format!(
                "bundle {} payout already claimed by session {}",
                self.id, existing.session_id
            )));
        }
        if self.transfer_status != claim.from_status {
            return Err(SettlementError::ConsistencyError(format!(
                "bundle {} moved to {:?}",
                self.id, self.transfer_status
            )));
        }
        self.payout_claim = Some(claim);
        Ok(())
    }

    /// Applies a confirmed installment and clears the claim.
    pub fn settle_payout(&mut self, session_id: SessionId, transfer_id: &str) -> Result<PayoutClaim> {
        let claim = self.owned_claim(session_id)?;
        self.transfer_status = claim.next_status;
        self.transferred_minor += claim.amount_minor;
        self.final_transfer_reference = Some(transfer_id.to_string());
        self.payout_claim = None;
        Ok(claim)
    }

    pub fn release_payout_claim(&mut self, session_id: SessionId) -> Result<()> {
        self.owned_claim(session_id)?;
        self.payout_claim = None;
        Ok(())
    }

    fn owned_claim(&self, session_id: SessionId) -> Result<PayoutClaim> {
        match &self.payout_claim {
            Some(claim) if claim.session_id == session_id => Ok(claim.clone()),
            _ => Err(SettlementError::ConsistencyError(format!(
                "bundle {} holds no payout claim for session {}",
                self.id, session_id
            ))),
        }
    }
}

/// One scheduled occurrence of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSession {
    pub id: SessionId,
    pub bundle_id: BundleId,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    /// The booking row that consumed this session, when there is one.
    pub booking_id: Option<BookingId>,
    pub deducted_minutes: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BundleSession {
    pub fn new(id: SessionId, bundle_id: BundleId, duration_minutes: i64) -> Result<Self> {
        if duration_minutes <= 0 {
            return Err(SettlementError::ValidationError(
                "Session duration must be positive".to_string(),
            ));
        }
        Ok(Self {
            id,
            bundle_id,
            duration_minutes,
            status: SessionStatus::Scheduled,
            booking_id: None,
            deducted_minutes: None,
            completed_at: None,
        })
    }

    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Scheduled => {
                self.status = SessionStatus::Cancelled;
                Ok(())
            }
            SessionStatus::Completed => Err(SettlementError::ConsistencyError(format!(
                "session {} already completed",
                self.id
            ))),
            SessionStatus::Cancelled => Err(SettlementError::ConsistencyError(format!(
                "session {} already cancelled",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::FeeCalculator;
    use rust_decimal_macros::dec;

    fn bundle() -> Bundle {
        let breakdown = FeeCalculator::default().compute_for_bundle(85_000, 10).unwrap();
        Bundle::new(1, 7, 9, &breakdown, 600, Some("ch_1".into())).unwrap()
    }

    fn claim(session_id: SessionId, amount: Minor) -> PayoutClaim {
        PayoutClaim {
            session_id,
            duration_minutes: 90,
            amount_minor: amount,
            from_status: BundleTransferStatus::Pending,
            next_status: BundleTransferStatus::FullyTransferred,
            claimed_at: Utc::now(),
        }
    }

    #[test]
    fn test_completion_deducts_exact_hours() {
        let mut b = bundle();
        assert_eq!(b.total_hours(), dec!(10));
        let mut s1 = BundleSession::new(10, 1, 90).unwrap();
        let mut s2 = BundleSession::new(11, 1, 60).unwrap();

        b.complete_session(&mut s1, 90, Utc::now()).unwrap();
        assert_eq!(b.remaining_hours(), dec!(8.5));
        b.complete_session(&mut s2, 60, Utc::now()).unwrap();
        assert_eq!(b.remaining_hours(), dec!(7.5));
        assert_eq!(b.total_hours(), dec!(10));
        assert_eq!(b.sessions_completed_count, 2);
        assert_eq!(
            b.deducted_minutes(),
            s1.deducted_minutes.unwrap() + s2.deducted_minutes.unwrap()
        );
    }

    #[test]
    fn test_overdraw_is_rejected_not_clamped() {
        let mut b = bundle();
        let mut s = BundleSession::new(10, 1, 700).unwrap();
        let err = b.complete_session(&mut s, 700, Utc::now()).unwrap_err();
        assert!(matches!(err, SettlementError::ValidationError(_)));
        assert_eq!(b.remaining_minutes, 600);
        assert_eq!(s.status, SessionStatus::Scheduled);
    }

    #[test]
    fn test_wrong_bundle_linkage() {
        let mut b = bundle();
        let mut s = BundleSession::new(10, 2, 60).unwrap();
        assert!(matches!(
            b.complete_session(&mut s, 60, Utc::now()),
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[test]
    fn test_completed_session_is_consistency_conflict() {
        let mut b = bundle();
        let mut s = BundleSession::new(10, 1, 60).unwrap();
        b.complete_session(&mut s, 60, Utc::now()).unwrap();
        assert!(matches!(
            b.complete_session(&mut s, 60, Utc::now()),
            Err(SettlementError::ConsistencyError(_))
        ));
    }

    #[test]
    fn test_claim_blocks_other_sessions() {
        let mut b = bundle();
        b.claim_payout(claim(10, 85_000)).unwrap();
        let mut other = BundleSession::new(11, 1, 60).unwrap();
        assert!(matches!(
            b.complete_session(&mut other, 60, Utc::now()),
            Err(SettlementError::ConsistencyError(_))
        ));
        assert!(b.claim_payout(claim(11, 85_000)).is_err());
    }

    #[test]
    fn test_settle_and_release() {
        let mut b = bundle();
        b.claim_payout(claim(10, 85_000)).unwrap();
        assert!(b.settle_payout(11, "tr_x").is_err());
        b.settle_payout(10, "tr_1").unwrap();
        assert_eq!(b.transfer_status, BundleTransferStatus::FullyTransferred);
        assert_eq!(b.transferred_minor, 85_000);
        assert_eq!(b.final_transfer_reference.as_deref(), Some("tr_1"));
        assert!(b.payout_claim.is_none());

        let mut b = bundle();
        b.claim_payout(claim(10, 85_000)).unwrap();
        b.release_payout_claim(10).unwrap();
        assert_eq!(b.transfer_status, BundleTransferStatus::Pending);
    }

    #[test]
    fn test_cancelled_sessions_use_up_slots() {
        let breakdown = FeeCalculator::default().compute_for_bundle(30_000, 2).unwrap();
        let mut b = Bundle::new(1, 7, 9, &breakdown, 120, None).unwrap();
        let mut s1 = BundleSession::new(10, 1, 60).unwrap();
        let mut s2 = BundleSession::new(11, 1, 60).unwrap();
        let mut s3 = BundleSession::new(12, 1, 60).unwrap();

        b.cancel_session(&mut s1).unwrap();
        assert_eq!(b.sessions_cancelled_count, 1);
        assert_eq!(b.sessions_left(), 1);
        assert!(b.cancel_session(&mut s1).is_err());
        assert_eq!(b.sessions_cancelled_count, 1);

        b.complete_session(&mut s2, 60, Utc::now()).unwrap();
        assert_eq!(b.sessions_left(), 0);
        assert!(matches!(
            b.complete_session(&mut s3, 60, Utc::now()),
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[test]
    fn test_claimed_session_cannot_be_cancelled() {
        let mut b = bundle();
        let mut s = BundleSession::new(10, 1, 90).unwrap();
        b.claim_payout(claim(10, 85_000)).unwrap();
        assert!(matches!(
            b.cancel_session(&mut s),
            Err(SettlementError::ConsistencyError(_))
        ));
        assert_eq!(s.status, SessionStatus::Scheduled);
    }

    #[test]
    fn test_session_cancel() {
        let mut s = BundleSession::new(10, 1, 60).unwrap();
        s.cancel().unwrap();
        assert!(s.cancel().is_err());
        let mut b = bundle();
        assert!(matches!(
            b.complete_session(&mut s, 60, Utc::now()),
            Err(SettlementError::ValidationError(_))
        ));
    }
}
