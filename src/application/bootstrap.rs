//! Shared wiring for the two binaries: looking up the single tracked
//! account and opening a live price provider. Neither binary talks to SQLite
//! or the exchange's HTTP API beyond this.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::account::Account;

/// Looks up the single tracked account by name, creating it on first run.
/// `AccountRepository` has no insert method (accounts are provisioned
/// out-of-band in a multi-account deployment); this is the single-account
/// bootstrap path both `rustfolio-server` and `rustfolio-report` use.
pub async fn ensure_default_account(pool: &SqlitePool, name: &str) -> anyhow::Result<Uuid> {
    if let Some(row) = sqlx::query_as::<_, (String,)>("SELECT id FROM accounts WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(Uuid::parse_str(&row.0)?);
    }

    let account = Account::new(name);
    sqlx::query("INSERT INTO accounts (id, name, sync_status, created_at) VALUES (?, ?, ?, ?)")
        .bind(account.id.to_string())
        .bind(&account.name)
        .bind(account.sync_status.as_str())
        .bind(account.created_at.to_rfc3339())
        .execute(pool)
        .await?;

    Ok(account.id)
}
