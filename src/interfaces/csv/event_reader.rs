use crate::domain::booking::BookingId;
use crate::domain::bundle::{BundleId, SessionId};
use crate::domain::money::{Minor, minor_from_decimal};
use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Complete,
    Session,
    Compensate,
}

/// One row as it appears in the file. Columns: `event, target, session, amount, minutes`.
#[derive(Debug, Deserialize)]
struct EventRecord {
    event: EventKind,
    target: u64,
    #[serde(default)]
    session: Option<SessionId>,
    /// Minor units. Fractions are rejected rather than rounded.
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    minutes: Option<i64>,
}

/// A completion or cancellation signal for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementEvent {
    Complete {
        booking_id: BookingId,
    },
    Session {
        bundle_id: BundleId,
        session_id: SessionId,
        duration_minutes: i64,
    },
    Compensate {
        booking_id: BookingId,
        amount_minor: Minor,
    },
}

impl TryFrom<EventRecord> for SettlementEvent {
    type Error = SettlementError;

    fn try_from(record: EventRecord) -> Result<Self> {
        match record.event {
            EventKind::Complete => Ok(SettlementEvent::Complete {
                booking_id: record.target,
            }),
            EventKind::Session => {
                let session_id = record.session.ok_or_else(|| {
                    SettlementError::ValidationError("session event without session id".into())
                })?;
                let duration_minutes = record.minutes.ok_or_else(|| {
                    SettlementError::ValidationError("session event without minutes".into())
                })?;
                Ok(SettlementEvent::Session {
                    bundle_id: record.target,
                    session_id,
                    duration_minutes,
                })
            }
            EventKind::Compensate => {
                let amount = record.amount.ok_or_else(|| {
                    SettlementError::ValidationError("compensate event without amount".into())
                })?;
                Ok(SettlementEvent::Compensate {
                    booking_id: record.target,
                    amount_minor: minor_from_decimal(amount)?,
                })
            }
        }
    }
}

/// Reads settlement events from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing optional columns may be omitted.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields events; a malformed row yields an error and reading continues.
    pub fn events(self) -> impl Iterator<Item = Result<SettlementEvent>> {
        self.reader
            .into_deserialize::<EventRecord>()
            .map(|result| -> Result<SettlementEvent> { SettlementEvent::try_from(result?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "event, target, session, amount, minutes\n\
                    complete, 1,,,\n\
                    session, 2, 10,, 90\n\
                    compensate, 3,, 2500,";
        let events: Vec<Result<SettlementEvent>> = EventReader::new(data.as_bytes()).events().collect();

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &SettlementEvent::Complete { booking_id: 1 }
        );
        assert_eq!(
            events[1].as_ref().unwrap(),
            &SettlementEvent::Session {
                bundle_id: 2,
                session_id: 10,
                duration_minutes: 90
            }
        );
        assert_eq!(
            events[2].as_ref().unwrap(),
            &SettlementEvent::Compensate {
                booking_id: 3,
                amount_minor: 2_500
            }
        );
    }

    #[test]
    fn test_reader_short_rows() {
        let data = "event, target, session, amount, minutes\ncomplete, 4";
        let events: Vec<Result<SettlementEvent>> = EventReader::new(data.as_bytes()).events().collect();
        assert_eq!(
            events[0].as_ref().unwrap(),
            &SettlementEvent::Complete { booking_id: 4 }
        );
    }

    #[test]
    fn test_reader_malformed_lines() {
        let data = "event, target, session, amount, minutes\n\
                    refund, 1,,,\n\
                    session, 2,,, 60\n\
                    compensate, 3,, 12.5,";
        let events: Vec<Result<SettlementEvent>> = EventReader::new(data.as_bytes()).events().collect();

        assert!(matches!(events[0], Err(SettlementError::CsvError(_))));
        assert!(matches!(events[1], Err(SettlementError::ValidationError(_))));
        assert!(matches!(events[2], Err(SettlementError::ValidationError(_))));
    }
}
