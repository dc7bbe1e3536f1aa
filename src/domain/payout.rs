use super::transfer::IneligibleReason;
use serde::Serialize;
use std::fmt;

const ACCOUNT_PREFIX: &str = "acct_";
const PLACEHOLDER_MARKERS: [&str; 5] = ["test", "placeholder", "sandbox", "dummy", "fake"];

/// A connected payout account that real money may be sent to.
///
/// Ids must look like `acct_<suffix>`. Suffixes starting with `test`,
/// `placeholder`, `sandbox`, `dummy` or `fake` mark seeded or demo accounts
/// and are refused exactly like a missing account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutAccountId(String);

impl PayoutAccountId {
    pub fn parse(raw: Option<&str>) -> Result<Self, IneligibleReason> {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(IneligibleReason::NoPayoutAccount),
        };
        let suffix = raw
            .strip_prefix(ACCOUNT_PREFIX)
            .filter(|suffix| !suffix.is_empty())
            .ok_or(IneligibleReason::PlaceholderPayoutAccount)?;
        let lowered = suffix.to_ascii_lowercase();
        if PLACEHOLDER_MARKERS
            .iter()
            .any(|marker| lowered.starts_with(marker))
        {
            return Err(IneligibleReason::PlaceholderPayoutAccount);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayoutAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
