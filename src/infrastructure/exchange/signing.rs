//! HMAC-SHA256 request signing, grounded on the teacher's own
//! `BinanceExecutionService::sign_request`. Never mutates the caller's
//! parameters — a fresh, timestamped copy is signed and returned so a retry
//! can re-sign with an up-to-date timestamp without the caller needing to
//! know signing happened at all.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: i64 = 5000;

/// Appends `timestamp` and `recvWindow` to `params`, signs the resulting
/// query string, and returns the full signed query string. `params` is
/// never mutated.
pub fn sign(api_secret: &str, params: &[(&str, String)]) -> String {
    let timestamp = Utc::now().timestamp_millis();

    let mut signed_params: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    signed_params.push(("timestamp".to_string(), timestamp.to_string()));
    signed_params.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));

    let query_string: String = signed_params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let signature = hmac_hex(api_secret, &query_string);
    format!("{query_string}&signature={signature}")
}

fn hmac_hex(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_query_appends_timestamp_recv_window_and_signature() {
        let signed = sign("secret", &[("symbol", "BTCUSDT".to_string())]);
        assert!(signed.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(signed.contains("&recvWindow=5000&"));
        assert!(signed.contains("&signature="));
    }

    #[test]
    fn signature_is_64_hex_chars() {
        let signed = sign("secret", &[]);
        let signature = signed.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn does_not_mutate_caller_params() {
        let params = vec![("symbol".to_string(), "BTCUSDT".to_string())];
        let params_ref: Vec<(&str, String)> =
            params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let _ = sign("secret", &params_ref);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].0, "symbol");
    }
}
