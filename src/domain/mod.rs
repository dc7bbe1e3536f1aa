//! Domain layer: settlement entities, the fee calculator, payout policies
//! and the ports the application layer talks through.

pub mod booking;
pub mod bundle;
pub mod fees;
pub mod money;
pub mod payout;
pub mod policy;
pub mod ports;
pub mod transfer;
