//! CLI-specific error formatting for user-facing messages.

use crate::error::{BankDataError, RecoverySuggestion};

/// Map a [`BankDataError`] to a user-facing help string with actionable
/// guidance.
pub fn format_error_help(err: &BankDataError) -> String {
    match err.recovery_suggestion() {
        RecoverySuggestion::CheckCredentials => format!(
            "{err}. Check BANKDATA_SECRET_ID / BANKDATA_SECRET_KEY, then run: bankdata auth reset"
        ),
        RecoverySuggestion::WaitForQuotaReset => {
            format!("{err}. The daily quota resets 24h after its first use; see: bankdata auth status")
        }
        RecoverySuggestion::CheckConfiguration => {
            format!("{err}. Check your config file or BANKDATA_* environment variables")
        }
        RecoverySuggestion::CheckStorage => {
            format!("{err}. Check permissions of the data directory (BANKDATA_DATA_DIR)")
        }
        RecoverySuggestion::RetryLater => format!("{err}. Try again later"),
        RecoverySuggestion::ContactSupport => format!("{err}"),
    }
}
