use crate::config::PayoutConfig;
use crate::domain::booking::{Booking, BookingId, PaymentStatus, ProviderId, TransferStatus};
use crate::domain::bundle::{Bundle, BundleId, BundleSession, PayoutClaim, SessionId};
use crate::domain::money::{Minor, ensure_positive};
use crate::domain::payout::PayoutAccountId;
use crate::domain::policy::PayoutPolicyRef;
use crate::domain::ports::{
    ClockRef, LedgerStoreRef, PaymentProcessorRef, PayoutAccountRegistryRef, TransferLogRef,
};
use crate::domain::transfer::{
    AttemptStatus, ChargeReference, ClaimResolution, FAILED_MARKER, IneligibleReason,
    NewTransferAttempt, TransferAttempt, TransferDecision, TransferKind, TransferRequest,
    TransferTarget, UNCONFIRMED_MARKER,
};
use crate::error::{ProcessorError, Result, SettlementError};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ledger state after a booking's completion transfer.
#[derive(Debug, Clone)]
pub struct BookingTransfer {
    pub booking: Booking,
    pub attempt: TransferAttempt,
}

/// Ledger state after a bundle session was consumed.
#[derive(Debug, Clone)]
pub struct InstallmentOutcome {
    pub bundle: Bundle,
    pub session: BundleSession,
    pub hours_deducted: Decimal,
    /// `None` when the active policy issues no transfer for this session.
    pub attempt: Option<TransferAttempt>,
}

#[derive(Debug, Clone)]
pub struct CompensationTransfer {
    pub booking: Booking,
    pub attempt: TransferAttempt,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub transferred: Vec<BookingId>,
    /// Bookings another trigger already handled.
    pub skipped: Vec<BookingId>,
    pub failed: Vec<(BookingId, String)>,
}

/// Result of one guarded processor call. The attempt row is already written.
enum CallOutcome {
    Sent(TransferAttempt),
    Failed(TransferAttempt, ProcessorError),
}

struct TransferCall<'a> {
    kind: TransferKind,
    target: TransferTarget,
    amount_minor: Minor,
    destination: &'a PayoutAccountId,
    charge: &'a ChargeReference,
    idempotency_key: String,
}

/// Gates, executes and logs transfers from the platform balance to providers.
///
/// Every transfer follows the same sequence: check eligibility, claim the
/// record atomically, call the processor without holding any lock, append the
/// attempt row, then confirm (or release) the claim. A caller that loses the
/// claim race gets a `ConsistencyError` and never reaches the processor.
/// Nothing is retried here; retries are re-invocations by the caller.
pub struct TransferOrchestrator {
    ledger: LedgerStoreRef,
    attempts: TransferLogRef,
    processor: PaymentProcessorRef,
    accounts: PayoutAccountRegistryRef,
    clock: ClockRef,
    policy: PayoutPolicyRef,
    currency: String,
    timeout: Duration,
}

impl TransferOrchestrator {
    pub fn new(
        ledger: LedgerStoreRef,
        attempts: TransferLogRef,
        processor: PaymentProcessorRef,
        accounts: PayoutAccountRegistryRef,
        clock: ClockRef,
        config: &PayoutConfig,
    ) -> Self {
        Self {
            ledger,
            attempts,
            processor,
            accounts,
            clock,
            policy: config.policy.build(),
            currency: config.currency.clone(),
            timeout: config.processor_timeout(),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Checks, in order: record exists, payment confirmed, transfer still in
    /// escrow, delivery end reached, usable payout account.
    pub async fn can_transfer(&self, booking_id: BookingId) -> Result<TransferDecision> {
        let Some(booking) = self.ledger.get_booking(booking_id).await? else {
            return Ok(TransferDecision::blocked(IneligibleReason::NotFound));
        };
        if let Some(reason) = booking.transfer_blocker(self.clock.now()) {
            return Ok(TransferDecision::blocked(reason));
        }
        match self.destination(booking.provider_id).await? {
            Ok(_) => Ok(TransferDecision::allowed()),
            Err(reason) => Ok(TransferDecision::blocked(reason)),
        }
    }

    pub async fn transfer_for_completed_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<BookingTransfer> {
        let now = self.clock.now();
        let booking = self
            .ledger
            .get_booking(booking_id)
            .await?
            .ok_or(SettlementError::EligibilityError(IneligibleReason::NotFound))?;
        if let Some(reason) = booking.transfer_blocker(now) {
            debug!(booking_id, %reason, "Booking not eligible for transfer");
            return Err(reason.into());
        }
        let destination = self.destination(booking.provider_id).await??;
        let charge = charge_reference(booking.charge_reference.as_deref())?;

        self.ledger
            .update_booking(booking_id, &|b: &mut Booking| b.claim_transfer(now))
            .await?;

        let outcome = self
            .execute(TransferCall {
                kind: TransferKind::SessionCompletion,
                target: TransferTarget::Booking(booking_id),
                amount_minor: booking.provider_net_minor(),
                destination: &destination,
                charge: &charge,
                idempotency_key: format!("booking-{}-completion", booking_id),
            })
            .await?;

        match outcome {
            CallOutcome::Sent(attempt) => {
                let confirmed_at = self.clock.now();
                let booking = self
                    .ledger
                    .update_booking(booking_id, &|b: &mut Booking| {
                        b.confirm_transfer(&attempt.processor_transfer_id, confirmed_at)
                    })
                    .await
                    .inspect_err(|e| {
                        error!(booking_id, error = %e, "Transfer sent but booking not confirmed");
                    })?;
                info!(
                    booking_id,
                    amount_minor = attempt.amount_minor,
                    transfer_id = %attempt.processor_transfer_id,
                    "Booking transfer confirmed"
                );
                Ok(BookingTransfer { booking, attempt })
            }
            CallOutcome::Failed(_, cause) => {
                if cause.is_ambiguous() {
                    warn!(booking_id, error = %cause, "Transfer unconfirmed, booking left claimed");
                } else {
                    self.ledger
                        .update_booking(booking_id, &|b: &mut Booking| b.release_claim())
                        .await?;
                    warn!(booking_id, error = %cause, "Transfer failed, booking back in escrow");
                }
                Err(cause.into())
            }
        }
    }

    pub async fn transfer_bundle_session_installment(
        &self,
        bundle_id: BundleId,
        session_id: SessionId,
        duration_minutes: i64,
    ) -> Result<InstallmentOutcome> {
        ensure_positive(duration_minutes, "Session duration")?;
        let now = self.clock.now();
        let bundle = self.ledger.get_bundle(bundle_id).await?.ok_or_else(|| {
            SettlementError::ValidationError(format!("bundle {} not found", bundle_id))
        })?;
        let session = self.ledger.get_session(session_id).await?.ok_or_else(|| {
            SettlementError::ValidationError(format!("session {} not found", session_id))
        })?;
        bundle.check_completion(&session, duration_minutes)?;
        let hours_deducted = Decimal::from(duration_minutes) / Decimal::from(60);

        let Some(plan) = self.policy.plan(&bundle) else {
            let policy = &self.policy;
            let (bundle, session) = self
                .ledger
                .update_bundle_session(
                    bundle_id,
                    session_id,
                    &|b: &mut Bundle, s: &mut BundleSession| {
                        if policy.plan(b).is_some() {
                            return Err(SettlementError::ConsistencyError(format!(
                                "bundle {} payout state changed",
                                b.id
                            )));
                        }
                        b.complete_session(s, duration_minutes, now)
                    },
                )
                .await?;
            info!(
                bundle_id,
                session_id,
                remaining_hours = %bundle.remaining_hours(),
                "Bundle session completed without transfer"
            );
            return Ok(InstallmentOutcome {
                bundle,
                session,
                hours_deducted,
                attempt: None,
            });
        };

        let destination = self.destination(bundle.provider_id).await??;
        let charge = charge_reference(bundle.charge_reference.as_deref())?;
        let claim = PayoutClaim {
            session_id,
            duration_minutes,
            amount_minor: plan.amount_minor,
            from_status: bundle.transfer_status,
            next_status: plan.next_status,
            claimed_at: now,
        };
        self.ledger
            .update_bundle_session(
                bundle_id,
                session_id,
                &|b: &mut Bundle, s: &mut BundleSession| {
                    b.check_completion(s, duration_minutes)?;
                    b.claim_payout(claim.clone())
                },
            )
            .await?;

        let outcome = self
            .execute(TransferCall {
                kind: TransferKind::BundleSessionPayout,
                target: TransferTarget::Bundle(bundle_id),
                amount_minor: plan.amount_minor,
                destination: &destination,
                charge: &charge,
                idempotency_key: format!("bundle-{}-session-{}", bundle_id, session_id),
            })
            .await?;

        match outcome {
            CallOutcome::Sent(attempt) => {
                let completed_at = self.clock.now();
                let (bundle, session) = self
                    .ledger
                    .update_bundle_session(
                        bundle_id,
                        session_id,
                        &|b: &mut Bundle, s: &mut BundleSession| {
                            b.settle_payout(session_id, &attempt.processor_transfer_id)?;
                            b.complete_session(s, duration_minutes, completed_at)
                        },
                    )
                    .await
                    .inspect_err(|e| {
                        error!(bundle_id, session_id, error = %e, "Installment sent but bundle not updated");
                    })?;
                info!(
                    bundle_id,
                    session_id,
                    amount_minor = attempt.amount_minor,
                    transfer_id = %attempt.processor_transfer_id,
                    status = ?bundle.transfer_status,
                    "Bundle installment transferred"
                );
                Ok(InstallmentOutcome {
                    bundle,
                    session,
                    hours_deducted,
                    attempt: Some(attempt),
                })
            }
            CallOutcome::Failed(_, cause) => {
                if cause.is_ambiguous() {
                    warn!(bundle_id, session_id, error = %cause, "Installment unconfirmed, bundle left claimed");
                } else {
                    self.ledger
                        .update_bundle(bundle_id, &|b: &mut Bundle| {
                            b.release_payout_claim(session_id)
                        })
                        .await?;
                    warn!(bundle_id, session_id, error = %cause, "Installment failed, session not consumed");
                }
                Err(cause.into())
            }
        }
    }

    /// Pays a late-cancellation penalty to the provider, independent of the
    /// booking's main transfer state. At most one per booking.
    pub async fn transfer_cancellation_compensation(
        &self,
        booking_id: BookingId,
        amount_minor: Minor,
    ) -> Result<CompensationTransfer> {
        ensure_positive(amount_minor, "Compensation amount")?;
        let booking = self
            .ledger
            .get_booking(booking_id)
            .await?
            .ok_or(SettlementError::EligibilityError(IneligibleReason::NotFound))?;
        if amount_minor > booking.provider_net_minor() {
            return Err(SettlementError::ValidationError(format!(
                "Compensation {} exceeds provider net {} of booking {}",
                amount_minor,
                booking.provider_net_minor(),
                booking_id
            )));
        }
        let destination = self.destination(booking.provider_id).await??;
        let charge = charge_reference(booking.charge_reference.as_deref())?;

        self.ledger
            .update_booking(booking_id, &|b: &mut Booking| b.claim_compensation(amount_minor))
            .await?;

        let outcome = self
            .execute(TransferCall {
                kind: TransferKind::CancellationCompensation,
                target: TransferTarget::Booking(booking_id),
                amount_minor,
                destination: &destination,
                charge: &charge,
                idempotency_key: format!("booking-{}-compensation", booking_id),
            })
            .await?;

        match outcome {
            CallOutcome::Sent(attempt) => {
                let booking = self
                    .ledger
                    .update_booking(booking_id, &|b: &mut Booking| {
                        b.confirm_compensation(&attempt.processor_transfer_id)
                            .map(|_| ())
                    })
                    .await?;
                info!(
                    booking_id,
                    amount_minor,
                    transfer_id = %attempt.processor_transfer_id,
                    "Cancellation compensation transferred"
                );
                Ok(CompensationTransfer { booking, attempt })
            }
            CallOutcome::Failed(_, cause) => {
                if !cause.is_ambiguous() {
                    self.ledger
                        .update_booking(booking_id, &|b: &mut Booking| b.release_compensation())
                        .await?;
                }
                warn!(booking_id, error = %cause, "Compensation transfer failed");
                Err(cause.into())
            }
        }
    }

    /// Resolves a booking stuck in `Claimed` after an unconfirmed call.
    pub async fn reconcile_booking(
        &self,
        booking_id: BookingId,
        resolution: ClaimResolution,
    ) -> Result<Booking> {
        let now = self.clock.now();
        match resolution {
            ClaimResolution::Settled { transfer_id } => {
                let booking = self
                    .ledger
                    .update_booking(booking_id, &|b: &mut Booking| {
                        b.confirm_transfer(&transfer_id, now)
                    })
                    .await?;
                info!(booking_id, %transfer_id, "Claimed booking reconciled as transferred");
                Ok(booking)
            }
            ClaimResolution::NotSent => {
                let booking = self
                    .ledger
                    .update_booking(booking_id, &|b: &mut Booking| b.release_claim())
                    .await?;
                self.fail_unconfirmed(TransferTarget::Booking(booking_id), TransferKind::SessionCompletion)
                    .await?;
                info!(booking_id, "Claimed booking released back to escrow");
                Ok(booking)
            }
        }
    }

    /// Resolves a bundle whose installment claim was never confirmed.
    pub async fn reconcile_bundle(
        &self,
        bundle_id: BundleId,
        resolution: ClaimResolution,
    ) -> Result<Bundle> {
        let now = self.clock.now();
        let bundle = self.ledger.get_bundle(bundle_id).await?.ok_or_else(|| {
            SettlementError::ValidationError(format!("bundle {} not found", bundle_id))
        })?;
        let claim = bundle.payout_claim.ok_or_else(|| {
            SettlementError::ConsistencyError(format!("bundle {} has no pending claim", bundle_id))
        })?;
        match resolution {
            ClaimResolution::Settled { transfer_id } => {
                let (bundle, _) = self
                    .ledger
                    .update_bundle_session(
                        bundle_id,
                        claim.session_id,
                        &|b: &mut Bundle, s: &mut BundleSession| {
                            b.settle_payout(claim.session_id, &transfer_id)?;
                            b.complete_session(s, claim.duration_minutes, now)
                        },
                    )
                    .await?;
                info!(bundle_id, session_id = claim.session_id, %transfer_id, "Bundle claim reconciled");
                Ok(bundle)
            }
            ClaimResolution::NotSent => {
                let bundle = self
                    .ledger
                    .update_bundle(bundle_id, &|b: &mut Bundle| {
                        b.release_payout_claim(claim.session_id)
                    })
                    .await?;
                self.fail_unconfirmed(TransferTarget::Bundle(bundle_id), TransferKind::BundleSessionPayout)
                    .await?;
                info!(bundle_id, session_id = claim.session_id, "Bundle claim released");
                Ok(bundle)
            }
        }
    }

    /// Resolves a compensation stuck in `Claimed`.
    pub async fn reconcile_compensation(
        &self,
        booking_id: BookingId,
        resolution: ClaimResolution,
    ) -> Result<Booking> {
        match resolution {
            ClaimResolution::Settled { transfer_id } => {
                self.ledger
                    .update_booking(booking_id, &|b: &mut Booking| {
                        b.confirm_compensation(&transfer_id).map(|_| ())
                    })
                    .await
            }
            ClaimResolution::NotSent => {
                let booking = self
                    .ledger
                    .update_booking(booking_id, &|b: &mut Booking| b.release_compensation())
                    .await?;
                self.fail_unconfirmed(
                    TransferTarget::Booking(booking_id),
                    TransferKind::CancellationCompensation,
                )
                .await?;
                Ok(booking)
            }
        }
    }

    /// Applies an asynchronous status callback from the processor.
    pub async fn record_transfer_status(
        &self,
        processor_transfer_id: &str,
        status: AttemptStatus,
    ) -> Result<Option<TransferAttempt>> {
        let updated = self
            .attempts
            .update_status(processor_transfer_id, status)
            .await?;
        match &updated {
            None => warn!(transfer_id = processor_transfer_id, "Status callback for unknown transfer"),
            Some(attempt) if matches!(status, AttemptStatus::Failed | AttemptStatus::Canceled) => {
                warn!(
                    transfer_id = processor_transfer_id,
                    transfer_target = %attempt.target,
                    status = status.as_str(),
                    "Processor reports transfer did not settle, listed in reversed transfers"
                );
            }
            Some(_) => debug!(transfer_id = processor_transfer_id, status = status.as_str(), "Transfer status updated"),
        }
        Ok(updated)
    }

    /// Processor-issued transfers that were later reported `failed` or `canceled`.
    ///
    /// The ledger already counts these funds as released, so each one needs
    /// manual follow-up. Synthetic rows are excluded since no money moved.
    pub async fn reversed_transfers(&self) -> Result<Vec<TransferAttempt>> {
        Ok(self
            .attempts
            .all_attempts()
            .await?
            .into_iter()
            .filter(|a| {
                !a.is_synthetic()
                    && matches!(a.status, AttemptStatus::Failed | AttemptStatus::Canceled)
            })
            .collect())
    }

    /// Bookings left claimed by an unconfirmed call, for the reconciliation job.
    pub async fn claimed_bookings(&self) -> Result<Vec<Booking>> {
        Ok(self
            .ledger
            .all_bookings()
            .await?
            .into_iter()
            .filter(|b| b.transfer_status == TransferStatus::Claimed)
            .collect())
    }

    /// Runs the completion transfer for every paid booking whose delivery has ended.
    pub async fn sweep_due_bookings(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let due: Vec<BookingId> = self
            .ledger
            .all_bookings()
            .await?
            .into_iter()
            .filter(|b| {
                b.payment_status == PaymentStatus::Paid
                    && b.transfer_status == TransferStatus::Pending
                    && now >= b.delivery_end
            })
            .map(|b| b.id)
            .collect();

        let mut report = SweepReport::default();
        for booking_id in due {
            match self.transfer_for_completed_booking(booking_id).await {
                Ok(_) => report.transferred.push(booking_id),
                Err(e) if e.is_benign() => report.skipped.push(booking_id),
                Err(e) => report.failed.push((booking_id, e.to_string())),
            }
        }
        info!(
            transferred = report.transferred.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Due booking sweep finished"
        );
        Ok(report)
    }

    async fn destination(
        &self,
        provider_id: ProviderId,
    ) -> Result<std::result::Result<PayoutAccountId, IneligibleReason>> {
        let raw = self.accounts.payout_account(provider_id).await?;
        Ok(PayoutAccountId::parse(raw.as_deref()))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, ProcessorError>>,
    ) -> std::result::Result<T, ProcessorError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProcessorError::Timeout(self.timeout)),
        }
    }

    async fn resolve_charge(
        &self,
        charge: &ChargeReference,
    ) -> std::result::Result<String, ProcessorError> {
        match charge {
            ChargeReference::Charge(id) => Ok(id.clone()),
            // A lookup that timed out moved no money, so it is never ambiguous.
            ChargeReference::PaymentIntent(intent) => {
                match self
                    .bounded(self.processor.charge_for_payment_intent(intent))
                    .await
                {
                    Err(ProcessorError::Timeout(after)) => Err(ProcessorError::Unreachable(
                        format!("charge lookup timed out after {:?}", after),
                    )),
                    other => other,
                }
            }
        }
    }

    /// Resolves the charge, issues the transfer and writes exactly one attempt row.
    async fn execute(&self, call: TransferCall<'_>) -> Result<CallOutcome> {
        let result = match self.resolve_charge(call.charge).await {
            Ok(source_charge) => {
                let request = TransferRequest {
                    amount_minor: call.amount_minor,
                    currency: self.currency.clone(),
                    destination: call.destination.as_str().to_string(),
                    source_charge,
                    transfer_group: call.target.to_string().replace(':', "-"),
                    idempotency_key: call.idempotency_key.clone(),
                };
                self.bounded(self.processor.create_transfer(&request)).await
            }
            Err(e) => Err(e),
        };

        let now = self.clock.now();
        let (processor_transfer_id, status) = match &result {
            Ok(transfer) => (transfer.id.clone(), AttemptStatus::Pending),
            Err(e) => {
                let (marker, status) = if e.is_ambiguous() {
                    (UNCONFIRMED_MARKER, AttemptStatus::Pending)
                } else {
                    (FAILED_MARKER, AttemptStatus::Failed)
                };
                // Tries of one key are serialized by its claim, so the count is stable.
                let try_number = self
                    .attempts
                    .attempts_for(call.target)
                    .await?
                    .iter()
                    .filter(|a| a.idempotency_key == call.idempotency_key)
                    .count()
                    + 1;
                (
                    format!(
                        "{}{}_{}_{}",
                        marker,
                        call.idempotency_key,
                        now.timestamp_millis(),
                        try_number
                    ),
                    status,
                )
            }
        };
        let attempt = self
            .attempts
            .append(NewTransferAttempt {
                target: call.target,
                amount_minor: call.amount_minor,
                processor_transfer_id,
                status,
                kind: call.kind,
                idempotency_key: call.idempotency_key,
                created_at: now,
            })
            .await?;

        Ok(match result {
            Ok(_) => CallOutcome::Sent(attempt),
            Err(e) => CallOutcome::Failed(attempt, e),
        })
    }

    async fn fail_unconfirmed(&self, target: TransferTarget, kind: TransferKind) -> Result<()> {
        let stale = self
            .attempts
            .attempts_for(target)
            .await?
            .into_iter()
            .filter(|a| {
                a.kind == kind
                    && a.status == AttemptStatus::Pending
                    && a.processor_transfer_id.starts_with(UNCONFIRMED_MARKER)
            });
        for attempt in stale {
            self.attempts
                .update_status(&attempt.processor_transfer_id, AttemptStatus::Failed)
                .await?;
        }
        Ok(())
    }
}

fn charge_reference(raw: Option<&str>) -> Result<ChargeReference> {
    raw.and_then(ChargeReference::parse)
        .ok_or(SettlementError::EligibilityError(
            IneligibleReason::MissingChargeReference,
        ))
}
