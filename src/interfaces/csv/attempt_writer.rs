use crate::domain::transfer::TransferAttempt;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AttemptRow<'a> {
    attempt: u64,
    target: String,
    kind: &'static str,
    amount: i64,
    transfer_id: &'a str,
    status: &'static str,
    created_at: String,
}

impl<'a> From<&'a TransferAttempt> for AttemptRow<'a> {
    fn from(attempt: &'a TransferAttempt) -> Self {
        Self {
            attempt: attempt.id,
            target: attempt.target.to_string(),
            kind: attempt.kind.as_str(),
            amount: attempt.amount_minor,
            transfer_id: &attempt.processor_transfer_id,
            status: attempt.status.as_str(),
            created_at: attempt.created_at.to_rfc3339(),
        }
    }
}

/// Writes the transfer attempt log as CSV, one row per attempt in log order.
pub struct AttemptWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AttemptWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_attempts<'a, I>(&mut self, attempts: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TransferAttempt>,
    {
        for attempt in attempts {
            self.writer.serialize(AttemptRow::from(attempt))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transfer::{AttemptStatus, TransferKind, TransferTarget};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_writer_output() {
        let attempt = TransferAttempt {
            id: 1,
            target: TransferTarget::Bundle(3),
            amount_minor: 85_000,
            processor_transfer_id: "tr_sim_1".into(),
            status: AttemptStatus::Pending,
            kind: TransferKind::BundleSessionPayout,
            idempotency_key: "bundle-3-session-1".into(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
        };
        let mut buf = Vec::new();
        AttemptWriter::new(&mut buf)
            .write_attempts([&attempt])
            .unwrap();

        let out = String::from_utf8(buf).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some("attempt,target,kind,amount,transfer_id,status,created_at")
        );
        assert_eq!(
            lines.next(),
            Some("1,bundle:3,bundle_session_payout,85000,tr_sim_1,pending,2026-03-02T10:00:00+00:00")
        );
    }

    #[test]
    fn test_writer_empty_log() {
        let mut buf = Vec::new();
        AttemptWriter::new(&mut buf)
            .write_attempts(std::iter::empty())
            .unwrap();
        assert!(buf.is_empty());
    }
}
