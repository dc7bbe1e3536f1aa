//! Application services.
//!
//! `SettlementLedger` is what checkout and payment webhooks talk to;
//! `TransferOrchestrator` is the only component that releases escrowed funds.

pub mod ledger;
pub mod orchestrator;
