//! Credential loading. Decrypting `Account::api_key_encrypted` at rest is an
//! external collaborator's responsibility (out of scope, see spec Non-goals);
//! this module only provides the seam (`CredentialStore`) and a plaintext
//! env-var implementation suitable for local development and the sync
//! orchestrator's integration tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::ExchangeError;
use crate::domain::ports::CredentialStore;

/// Reads `EXCHANGE_API_KEY`/`EXCHANGE_API_SECRET` directly, ignoring which
/// account is being asked about. Fine for a single-account deployment; a
/// production `CredentialStore` backed by an encrypted column and a KMS key
/// would key off `account_id` instead.
pub struct EnvCredentialStore {
    api_key: String,
    api_secret: String,
}

impl EnvCredentialStore {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn load(&self, _account_id: Uuid) -> Result<(String, String), ExchangeError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ExchangeError::Authentication {
                reason: "no exchange credentials configured".to_string(),
            });
        }
        Ok((self.api_key.clone(), self.api_secret.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_credentials_fail_fast() {
        let store = EnvCredentialStore::new(String::new(), String::new());
        let result = store.load(Uuid::nil()).await;
        assert!(matches!(result, Err(ExchangeError::Authentication { .. })));
    }

    #[tokio::test]
    async fn returns_configured_pair() {
        let store = EnvCredentialStore::new("key".into(), "secret".into());
        let (key, secret) = store.load(Uuid::nil()).await.unwrap();
        assert_eq!(key, "key");
        assert_eq!(secret, "secret");
    }
}
