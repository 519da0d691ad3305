use thiserror::Error;

/// Errors surfaced by the exchange client. Kept distinct from `anyhow::Error`
/// so callers (the sync orchestrator) can match on kind, e.g. to decide
/// whether a step should be skipped rather than aborted.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authentication rejected by exchange: {reason}")]
    Authentication { reason: String },

    #[error("rate limit exhausted after {retries} retries, retry after {retry_after_secs}s")]
    RateLimit { retries: u32, retry_after_secs: u64 },

    #[error("network error talking to exchange: {reason}")]
    Network { reason: String },

    #[error("exchange API error {code}: {message}")]
    ExchangeApi { code: i64, message: String },

    #[error("data integrity violation: {reason}")]
    DataIntegrity { reason: String },

    #[error("failed to decrypt stored credentials: {reason}")]
    Decryption { reason: String },
}

impl ExchangeError {
    /// `-2015`/`-1002`/`-2014` on the fiat-orders endpoint mean "feature not
    /// available for this account" rather than a real failure — the sync
    /// step should log and move on instead of aborting.
    pub fn is_fiat_unavailable(&self) -> bool {
        matches!(
            self,
            ExchangeError::ExchangeApi { code, .. } if matches!(code, -2015 | -1002 | -2014)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fiat_unavailable_matches_known_codes() {
        let err = ExchangeError::ExchangeApi {
            code: -2015,
            message: "Invalid API-key, IP, or permissions".into(),
        };
        assert!(err.is_fiat_unavailable());

        let err = ExchangeError::ExchangeApi {
            code: -1013,
            message: "Invalid quantity".into(),
        };
        assert!(!err.is_fiat_unavailable());
    }

    #[test]
    fn rate_limit_formatting() {
        let err = ExchangeError::RateLimit {
            retries: 3,
            retry_after_secs: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("60"));
    }
}
