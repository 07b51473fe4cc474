//! PostgreSQL [`SettlementStore`] (feature `postgres`).
//!
//! Inventory, portfolio and transaction writes for one trade run in a single
//! database transaction. The inventory decrement is a conditional `UPDATE`
//! guarded by `available_tokens >= quantity`, so concurrent buyers in
//! different processes cannot oversell even without the in-process asset
//! locks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use rwa_core::{
    Amount, AssetCategory, AssetId, ConflictReason, LedgerAccountId, LedgerTxRef, Timestamp,
    TokenId, TransactionId, UserId,
};
use rwa_ledger::{SignerKey, TokenIssuance};
use rwa_state::{
    Asset, AssetTransitionRecord, Identity, KycStatus, KycTransitionRecord, LedgerRef,
    PortfolioEntry, Tokenization, TradeSide, Transaction, TransactionStatus, VerificationStatus,
};

use crate::store::{
    classify_existing, reservation_key, CommitOutcome, IssuanceRecord, ReconciliationKind,
    ReconciliationTask, SettlementStore, StoreError, TradeCommit,
};

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and apply the embedded migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        tracing::info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");

        Ok(Self { pool })
    }

    /// Connect using `DATABASE_URL`. Returns `None` if it is not set.
    pub async fn from_env() -> Result<Option<Self>, StoreError> {
        match std::env::var("DATABASE_URL") {
            Ok(url) => Self::connect(&url).await.map(Some),
            Err(_) => {
                tracing::warn!("DATABASE_URL not set; no PostgreSQL store available");
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_db(value: u64, field: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} {value} exceeds BIGINT")))
}

fn from_db(value: i64, kind: &'static str, field: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        kind,
        detail: format!("negative {field}: {value}"),
    })
}

fn corrupt(kind: &'static str) -> impl Fn(String) -> StoreError {
    move |detail| StoreError::Corrupt { kind, detail }
}

fn to_json<T: serde::Serialize>(value: &T, kind: &'static str) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Backend(format!("failed to serialize {kind}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    kind: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        kind,
        detail: e.to_string(),
    })
}

fn ts(dt: DateTime<Utc>) -> Timestamp {
    Timestamp::from_utc(dt)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct IdentityRow {
    user_id: Uuid,
    kyc_status: String,
    wallet: Option<String>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
    version: i64,
    transitions: serde_json::Value,
}

impl IdentityRow {
    fn into_identity(self) -> Result<Identity, StoreError> {
        let kind = "identity";
        Ok(Identity {
            user_id: UserId(self.user_id),
            kyc_status: KycStatus::parse(&self.kyc_status)
                .ok_or_else(|| corrupt(kind)(format!("unknown kyc status {:?}", self.kyc_status)))?,
            wallet: self
                .wallet
                .map(|w| LedgerAccountId::new(&w).map_err(|e| corrupt(kind)(e.to_string())))
                .transpose()?,
            rejection_reason: self.rejection_reason,
            created_at: ts(self.created_at),
            submitted_at: self.submitted_at.map(ts),
            reviewed_at: self.reviewed_at.map(ts),
            version: from_db(self.version, kind, "version")?,
            transitions: from_json::<Vec<KycTransitionRecord>>(self.transitions, kind)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: Uuid,
    owner: Uuid,
    name: String,
    description: String,
    category: serde_json::Value,
    verification_status: String,
    total_supply: i64,
    symbol: String,
    price_per_token: i64,
    reserved_tokens: i64,
    available_tokens: i64,
    token_id: Option<String>,
    treasury_account_id: Option<String>,
    issuance_tx_ref: Option<String>,
    is_listed: bool,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
    version: i64,
    transitions: serde_json::Value,
}

impl AssetRow {
    fn into_asset(self) -> Result<Asset, StoreError> {
        let kind = "asset";
        let ledger_ref = match (self.token_id, self.treasury_account_id, self.issuance_tx_ref) {
            (Some(token), Some(treasury), Some(tx_ref)) => Some(LedgerRef {
                token_id: TokenId::new(&token).map_err(|e| corrupt(kind)(e.to_string()))?,
                treasury_account_id: LedgerAccountId::new(&treasury)
                    .map_err(|e| corrupt(kind)(e.to_string()))?,
                issuance_tx_ref: LedgerTxRef::new(&tx_ref)
                    .map_err(|e| corrupt(kind)(e.to_string()))?,
            }),
            (None, None, None) => None,
            _ => return Err(corrupt(kind)(format!("asset {} has a partial ledger reference", self.id))),
        };
        Ok(Asset {
            id: AssetId(self.id),
            owner: UserId(self.owner),
            name: self.name,
            description: self.description,
            category: from_json::<AssetCategory>(self.category, kind)?,
            verification_status: VerificationStatus::parse(&self.verification_status).ok_or_else(
                || corrupt(kind)(format!("unknown status {:?}", self.verification_status)),
            )?,
            tokenization: Tokenization {
                total_supply: from_db(self.total_supply, kind, "total_supply")?,
                symbol: self.symbol,
                price_per_token: Amount(from_db(self.price_per_token, kind, "price_per_token")?),
                reserved_tokens: from_db(self.reserved_tokens, kind, "reserved_tokens")?,
                available_tokens: from_db(self.available_tokens, kind, "available_tokens")?,
            },
            ledger_ref,
            is_listed: self.is_listed,
            rejection_reason: self.rejection_reason,
            created_at: ts(self.created_at),
            reviewed_at: self.reviewed_at.map(ts),
            version: from_db(self.version, kind, "version")?,
            transitions: from_json::<Vec<AssetTransitionRecord>>(self.transitions, kind)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    account: String,
    asset_id: Uuid,
    side: String,
    quantity: i64,
    price_per_token: i64,
    total_amount: i64,
    status: String,
    external_ledger_tx_ref: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction, StoreError> {
        let kind = "transaction";
        Ok(Transaction {
            id: TransactionId(self.id),
            user_id: UserId(self.user_id),
            account: LedgerAccountId::new(&self.account).map_err(|e| corrupt(kind)(e.to_string()))?,
            asset_id: AssetId(self.asset_id),
            side: TradeSide::parse(&self.side)
                .ok_or_else(|| corrupt(kind)(format!("unknown side {:?}", self.side)))?,
            quantity: from_db(self.quantity, kind, "quantity")?,
            price_per_token: Amount(from_db(self.price_per_token, kind, "price_per_token")?),
            total_amount: Amount(from_db(self.total_amount, kind, "total_amount")?),
            status: TransactionStatus::parse(&self.status)
                .ok_or_else(|| corrupt(kind)(format!("unknown status {:?}", self.status)))?,
            external_ledger_tx_ref: self
                .external_ledger_tx_ref
                .map(|r| LedgerTxRef::new(&r).map_err(|e| corrupt(kind)(e.to_string())))
                .transpose()?,
            idempotency_key: self.idempotency_key,
            created_at: ts(self.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct PortfolioRow {
    user_id: Uuid,
    asset_id: Uuid,
    quantity: i64,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PortfolioRow {
    fn into_entry(self) -> Result<PortfolioEntry, StoreError> {
        Ok(PortfolioEntry {
            user_id: UserId(self.user_id),
            asset_id: AssetId(self.asset_id),
            quantity: from_db(self.quantity, "portfolio", "quantity")?,
            opened_at: ts(self.opened_at),
            updated_at: ts(self.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct IssuanceRow {
    asset_id: Uuid,
    mint_tx_ref: String,
    tokenization: serde_json::Value,
    admin_key_seed: String,
    supply_key_seed: String,
    issuance: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl IssuanceRow {
    fn into_record(self) -> Result<IssuanceRecord, StoreError> {
        let kind = "issuance";
        Ok(IssuanceRecord {
            asset_id: AssetId(self.asset_id),
            mint_tx_ref: LedgerTxRef::new(&self.mint_tx_ref)
                .map_err(|e| corrupt(kind)(e.to_string()))?,
            tokenization: from_json(self.tokenization, kind)?,
            admin_key: SignerKey::from_seed_hex(&self.admin_key_seed)
                .map_err(|e| corrupt(kind)(e.to_string()))?,
            supply_key: SignerKey::from_seed_hex(&self.supply_key_seed)
                .map_err(|e| corrupt(kind)(e.to_string()))?,
            issuance: self
                .issuance
                .map(|v| from_json::<TokenIssuance>(v, kind))
                .transpose()?,
            created_at: ts(self.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReconciliationRow {
    id: Uuid,
    kind: serde_json::Value,
    ledger_tx_ref: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl ReconciliationRow {
    fn into_task(self) -> Result<ReconciliationTask, StoreError> {
        let kind = "reconciliation task";
        Ok(ReconciliationTask {
            id: self.id,
            kind: from_json::<ReconciliationKind>(self.kind, kind)?,
            ledger_tx_ref: LedgerTxRef::new(&self.ledger_tx_ref)
                .map_err(|e| corrupt(kind)(e.to_string()))?,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_error: self.last_error,
            created_at: ts(self.created_at),
        })
    }
}

const IDENTITY_COLUMNS: &str = "user_id, kyc_status, wallet, rejection_reason, created_at, \
     submitted_at, reviewed_at, version, transitions";

const ASSET_COLUMNS: &str = "id, owner, name, description, category, verification_status, \
     total_supply, symbol, price_per_token, reserved_tokens, available_tokens, token_id, \
     treasury_account_id, issuance_tx_ref, is_listed, rejection_reason, created_at, reviewed_at, \
     version, transitions";

const TRANSACTION_COLUMNS: &str = "id, user_id, account, asset_id, side, quantity, \
     price_per_token, total_amount, status, external_ledger_tx_ref, idempotency_key, created_at";

// ---------------------------------------------------------------------------
// Trade commit helpers
// ---------------------------------------------------------------------------

async fn existing_commit(
    db: &mut DbTransaction<'_, Postgres>,
    tx: &Transaction,
) -> Result<Option<Transaction>, StoreError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE external_ledger_tx_ref = $1 OR (user_id = $2 AND idempotency_key = $3)
         ORDER BY (external_ledger_tx_ref = $1) IS TRUE DESC
         LIMIT 1"
    ))
    .bind(tx.external_ledger_tx_ref.as_ref().map(LedgerTxRef::as_str))
    .bind(tx.user_id.0)
    .bind(tx.idempotency_key.as_deref())
    .fetch_optional(&mut **db)
    .await?;
    row.map(TransactionRow::into_transaction).transpose()
}

async fn withdraw_inventory(
    db: &mut DbTransaction<'_, Postgres>,
    asset_id: AssetId,
    quantity: u64,
) -> Result<Option<ConflictReason>, StoreError> {
    let q = to_db(quantity, "quantity")?;
    let updated = sqlx::query(
        "UPDATE assets SET available_tokens = available_tokens - $2, version = version + 1
         WHERE id = $1 AND available_tokens >= $2",
    )
    .bind(asset_id.0)
    .bind(q)
    .execute(&mut **db)
    .await?;
    if updated.rows_affected() == 1 {
        return Ok(None);
    }
    let available: Option<i64> = sqlx::query_scalar("SELECT available_tokens FROM assets WHERE id = $1")
        .bind(asset_id.0)
        .fetch_optional(&mut **db)
        .await?;
    match available {
        None => Err(StoreError::Missing {
            kind: "asset",
            id: asset_id.to_string(),
        }),
        Some(available) => Ok(Some(ConflictReason::InsufficientAvailability {
            requested: quantity,
            available: from_db(available, "asset", "available_tokens")?,
        })),
    }
}

async fn apply_to_portfolio(
    db: &mut DbTransaction<'_, Postgres>,
    tx: &Transaction,
) -> Result<Option<ConflictReason>, StoreError> {
    let q = to_db(tx.quantity, "quantity")?;
    let now = Utc::now();
    match tx.side {
        TradeSide::Buy => {
            sqlx::query(
                "INSERT INTO portfolio_entries (user_id, asset_id, quantity, opened_at, updated_at)
                 VALUES ($1, $2, $3, $4, $4)
                 ON CONFLICT (user_id, asset_id) DO UPDATE SET
                    quantity = portfolio_entries.quantity + EXCLUDED.quantity,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(tx.user_id.0)
            .bind(tx.asset_id.0)
            .bind(q)
            .bind(now)
            .execute(&mut **db)
            .await?;
            Ok(None)
        }
        TradeSide::Sell => {
            let updated = sqlx::query(
                "UPDATE portfolio_entries SET quantity = quantity - $3, updated_at = $4
                 WHERE user_id = $1 AND asset_id = $2 AND quantity >= $3",
            )
            .bind(tx.user_id.0)
            .bind(tx.asset_id.0)
            .bind(q)
            .bind(now)
            .execute(&mut **db)
            .await?;
            if updated.rows_affected() == 1 {
                return Ok(None);
            }
            let held: Option<i64> = sqlx::query_scalar(
                "SELECT quantity FROM portfolio_entries WHERE user_id = $1 AND asset_id = $2",
            )
            .bind(tx.user_id.0)
            .bind(tx.asset_id.0)
            .fetch_optional(&mut **db)
            .await?;
            Ok(Some(ConflictReason::InsufficientHoldings {
                requested: tx.quantity,
                held: held.map(|h| from_db(h, "portfolio", "quantity")).transpose()?.unwrap_or(0),
            }))
        }
    }
}

/// Insert the transaction row. Returns `false` if a row with the same ledger
/// reference or idempotency key already exists.
async fn insert_transaction(
    db: &mut DbTransaction<'_, Postgres>,
    tx: &Transaction,
) -> Result<bool, StoreError> {
    let result = sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    ))
    .bind(tx.id.0)
    .bind(tx.user_id.0)
    .bind(tx.account.as_str())
    .bind(tx.asset_id.0)
    .bind(tx.side.as_str())
    .bind(to_db(tx.quantity, "quantity")?)
    .bind(to_db(tx.price_per_token.minor_units(), "price_per_token")?)
    .bind(to_db(tx.total_amount.minor_units(), "total_amount")?)
    .bind(tx.status.as_str())
    .bind(tx.external_ledger_tx_ref.as_ref().map(LedgerTxRef::as_str))
    .bind(tx.idempotency_key.as_deref())
    .bind(*tx.created_at.as_datetime())
    .execute(&mut **db)
    .await;
    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// SettlementStore
// ---------------------------------------------------------------------------

#[async_trait]
impl SettlementStore for PgStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO identities ({IDENTITY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(identity.user_id.0)
        .bind(identity.kyc_status.as_str())
        .bind(identity.wallet.as_ref().map(LedgerAccountId::as_str))
        .bind(identity.rejection_reason.as_deref())
        .bind(*identity.created_at.as_datetime())
        .bind(identity.submitted_at.map(|t| *t.as_datetime()))
        .bind(identity.reviewed_at.map(|t| *t.as_datetime()))
        .bind(to_db(identity.version, "version")?)
        .bind(to_json(&identity.transitions, "identity transitions")?)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                kind: "identity",
                id: identity.user_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_identity(&self, user_id: UserId) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE user_id = $1"
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(IdentityRow::into_identity)
        .transpose()
    }

    async fn update_identity(&self, identity: &Identity) -> Result<Identity, StoreError> {
        let updated = sqlx::query(
            "UPDATE identities SET kyc_status = $3, wallet = $4, rejection_reason = $5,
                submitted_at = $6, reviewed_at = $7, transitions = $8, version = version + 1
             WHERE user_id = $1 AND version = $2",
        )
        .bind(identity.user_id.0)
        .bind(to_db(identity.version, "version")?)
        .bind(identity.kyc_status.as_str())
        .bind(identity.wallet.as_ref().map(LedgerAccountId::as_str))
        .bind(identity.rejection_reason.as_deref())
        .bind(identity.submitted_at.map(|t| *t.as_datetime()))
        .bind(identity.reviewed_at.map(|t| *t.as_datetime()))
        .bind(to_json(&identity.transitions, "identity transitions")?)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = self.get_identity(identity.user_id).await?.is_some();
            return Err(if exists {
                StoreError::VersionConflict {
                    kind: "identity",
                    id: identity.user_id.to_string(),
                    expected: identity.version,
                }
            } else {
                StoreError::Missing {
                    kind: "identity",
                    id: identity.user_id.to_string(),
                }
            });
        }
        let mut stored = identity.clone();
        stored.version += 1;
        Ok(stored)
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let t = &asset.tokenization;
        let r = asset.ledger_ref.as_ref();
        let result = sqlx::query(&format!(
            "INSERT INTO assets ({ASSET_COLUMNS}) VALUES
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        ))
        .bind(asset.id.0)
        .bind(asset.owner.0)
        .bind(&asset.name)
        .bind(&asset.description)
        .bind(to_json(&asset.category, "asset category")?)
        .bind(asset.verification_status.as_str())
        .bind(to_db(t.total_supply, "total_supply")?)
        .bind(&t.symbol)
        .bind(to_db(t.price_per_token.minor_units(), "price_per_token")?)
        .bind(to_db(t.reserved_tokens, "reserved_tokens")?)
        .bind(to_db(t.available_tokens, "available_tokens")?)
        .bind(r.map(|r| r.token_id.as_str()))
        .bind(r.map(|r| r.treasury_account_id.as_str()))
        .bind(r.map(|r| r.issuance_tx_ref.as_str()))
        .bind(asset.is_listed)
        .bind(asset.rejection_reason.as_deref())
        .bind(*asset.created_at.as_datetime())
        .bind(asset.reviewed_at.map(|t| *t.as_datetime()))
        .bind(to_db(asset.version, "version")?)
        .bind(to_json(&asset.transitions, "asset transitions")?)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                kind: "asset",
                id: asset.id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_asset(&self, asset_id: AssetId) -> Result<Option<Asset>, StoreError> {
        sqlx::query_as::<_, AssetRow>(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1"))
            .bind(asset_id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(AssetRow::into_asset)
            .transpose()
    }

    async fn update_asset(&self, asset: &Asset) -> Result<Asset, StoreError> {
        let t = &asset.tokenization;
        let r = asset.ledger_ref.as_ref();
        let updated = sqlx::query(
            "UPDATE assets SET name = $3, description = $4, category = $5,
                verification_status = $6, total_supply = $7, symbol = $8, price_per_token = $9,
                reserved_tokens = $10, available_tokens = $11, token_id = $12,
                treasury_account_id = $13, issuance_tx_ref = $14, is_listed = $15,
                rejection_reason = $16, reviewed_at = $17, transitions = $18,
                version = version + 1
             WHERE id = $1 AND version = $2",
        )
        .bind(asset.id.0)
        .bind(to_db(asset.version, "version")?)
        .bind(&asset.name)
        .bind(&asset.description)
        .bind(to_json(&asset.category, "asset category")?)
        .bind(asset.verification_status.as_str())
        .bind(to_db(t.total_supply, "total_supply")?)
        .bind(&t.symbol)
        .bind(to_db(t.price_per_token.minor_units(), "price_per_token")?)
        .bind(to_db(t.reserved_tokens, "reserved_tokens")?)
        .bind(to_db(t.available_tokens, "available_tokens")?)
        .bind(r.map(|r| r.token_id.as_str()))
        .bind(r.map(|r| r.treasury_account_id.as_str()))
        .bind(r.map(|r| r.issuance_tx_ref.as_str()))
        .bind(asset.is_listed)
        .bind(asset.rejection_reason.as_deref())
        .bind(asset.reviewed_at.map(|t| *t.as_datetime()))
        .bind(to_json(&asset.transitions, "asset transitions")?)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = self.get_asset(asset.id).await?.is_some();
            return Err(if exists {
                StoreError::VersionConflict {
                    kind: "asset",
                    id: asset.id.to_string(),
                    expected: asset.version,
                }
            } else {
                StoreError::Missing {
                    kind: "asset",
                    id: asset.id.to_string(),
                }
            });
        }
        let mut stored = asset.clone();
        stored.version += 1;
        Ok(stored)
    }

    async fn commit_trade(&self, commit: &TradeCommit) -> Result<CommitOutcome, StoreError> {
        let tx = &commit.transaction;
        let mut db = self.pool.begin().await?;

        if let Some(existing) = existing_commit(&mut db, tx).await? {
            db.rollback().await?;
            return Ok(classify_existing(commit, existing));
        }

        if commit.inventory_withdrawal > 0 {
            if let Some(reason) = withdraw_inventory(&mut db, tx.asset_id, commit.inventory_withdrawal).await? {
                db.rollback().await?;
                return Ok(CommitOutcome::Refused(reason));
            }
        }

        if let Some(reason) = apply_to_portfolio(&mut db, tx).await? {
            db.rollback().await?;
            return Ok(CommitOutcome::Refused(reason));
        }

        if !insert_transaction(&mut db, tx).await? {
            // Another process committed the same trade first.
            db.rollback().await?;
            let mut fresh = self.pool.begin().await?;
            let existing = existing_commit(&mut fresh, tx).await?;
            fresh.rollback().await?;
            return existing
                .map(|existing| classify_existing(commit, existing))
                .ok_or_else(|| {
                    StoreError::Backend(format!("transaction {} conflicts with an unknown row", tx.id))
                });
        }

        if let Some(key) = tx.idempotency_key.as_deref() {
            sqlx::query("DELETE FROM order_reservations WHERE user_id = $1 AND idempotency_key = $2")
                .bind(tx.user_id.0)
                .bind(key)
                .execute(&mut *db)
                .await?;
        }
        db.commit().await?;
        Ok(CommitOutcome::Applied(tx.clone()))
    }

    async fn find_transaction_by_ledger_ref(
        &self,
        tx_ref: &LedgerTxRef,
    ) -> Result<Option<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE external_ledger_tx_ref = $1"
        ))
        .bind(tx_ref.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(TransactionRow::into_transaction)
        .transpose()
    }

    async fn find_transaction_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 AND idempotency_key = $2"
        ))
        .bind(user_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .map(TransactionRow::into_transaction)
        .transpose()
    }

    async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY seq"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TransactionRow::into_transaction)
        .collect()
    }

    async fn transactions_for_account(
        &self,
        account: &LedgerAccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE account = $1 ORDER BY seq"
        ))
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TransactionRow::into_transaction)
        .collect()
    }

    async fn reserve_order(&self, commit: &TradeCommit) -> Result<TradeCommit, StoreError> {
        let (user_id, key) = reservation_key(commit)?;
        sqlx::query(
            "INSERT INTO order_reservations (user_id, idempotency_key, trade_commit, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, idempotency_key) DO NOTHING",
        )
        .bind(user_id.0)
        .bind(key)
        .bind(to_json(commit, "order reservation")?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.reserved_order(user_id, key)
            .await?
            .ok_or_else(|| StoreError::Missing {
                kind: "order reservation",
                id: key.to_string(),
            })
    }

    async fn reserved_order(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<TradeCommit>, StoreError> {
        let stored: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT trade_commit FROM order_reservations WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        stored
            .map(|value| from_json(value, "order reservation"))
            .transpose()
    }

    async fn release_order(&self, user_id: UserId, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM order_reservations WHERE user_id = $1 AND idempotency_key = $2")
            .bind(user_id.0)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn portfolio(&self, user_id: UserId) -> Result<Vec<PortfolioEntry>, StoreError> {
        sqlx::query_as::<_, PortfolioRow>(
            "SELECT user_id, asset_id, quantity, opened_at, updated_at
             FROM portfolio_entries WHERE user_id = $1 ORDER BY opened_at, asset_id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PortfolioRow::into_entry)
        .collect()
    }

    async fn replace_portfolio(
        &self,
        user_id: UserId,
        entries: &[PortfolioEntry],
    ) -> Result<(), StoreError> {
        let mut db = self.pool.begin().await?;
        sqlx::query("DELETE FROM portfolio_entries WHERE user_id = $1")
            .bind(user_id.0)
            .execute(&mut *db)
            .await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO portfolio_entries (user_id, asset_id, quantity, opened_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(entry.user_id.0)
            .bind(entry.asset_id.0)
            .bind(to_db(entry.quantity, "quantity")?)
            .bind(*entry.opened_at.as_datetime())
            .bind(*entry.updated_at.as_datetime())
            .execute(&mut *db)
            .await?;
        }
        db.commit().await?;
        Ok(())
    }

    async fn remove_empty_portfolio_entry(
        &self,
        user_id: UserId,
        asset_id: AssetId,
    ) -> Result<bool, StoreError> {
        let deleted = sqlx::query(
            "DELETE FROM portfolio_entries WHERE user_id = $1 AND asset_id = $2 AND quantity = 0",
        )
        .bind(user_id.0)
        .bind(asset_id.0)
        .execute(&self.pool)
        .await?;
        Ok(deleted.rows_affected() == 1)
    }

    async fn save_issuance_keys(&self, record: &IssuanceRecord) -> Result<IssuanceRecord, StoreError> {
        let admin_seed = record.admin_key.seed_hex();
        let supply_seed = record.supply_key.seed_hex();
        sqlx::query(
            "INSERT INTO issuance_records
                (asset_id, mint_tx_ref, tokenization, admin_key_seed, supply_key_seed, issuance, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (asset_id) DO NOTHING",
        )
        .bind(record.asset_id.0)
        .bind(record.mint_tx_ref.as_str())
        .bind(to_json(&record.tokenization, "tokenization")?)
        .bind(admin_seed.as_str())
        .bind(supply_seed.as_str())
        .bind(record.issuance.as_ref().map(|i| to_json(i, "issuance")).transpose()?)
        .bind(*record.created_at.as_datetime())
        .execute(&self.pool)
        .await?;

        self.get_issuance(record.asset_id)
            .await?
            .ok_or_else(|| StoreError::Missing {
                kind: "issuance",
                id: record.asset_id.to_string(),
            })
    }

    async fn record_issuance(
        &self,
        asset_id: AssetId,
        issuance: &TokenIssuance,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE issuance_records SET issuance = $2 WHERE asset_id = $1")
            .bind(asset_id.0)
            .bind(to_json(issuance, "issuance")?)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Missing {
                kind: "issuance",
                id: asset_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_issuance(&self, asset_id: AssetId) -> Result<Option<IssuanceRecord>, StoreError> {
        sqlx::query_as::<_, IssuanceRow>(
            "SELECT asset_id, mint_tx_ref, tokenization, admin_key_seed, supply_key_seed, issuance, created_at
             FROM issuance_records WHERE asset_id = $1",
        )
        .bind(asset_id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(IssuanceRow::into_record)
        .transpose()
    }

    async fn enqueue_reconciliation(&self, task: &ReconciliationTask) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_tasks (id, kind, ledger_tx_ref, attempts, last_error, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(task.id)
        .bind(to_json(&task.kind, "reconciliation kind")?)
        .bind(task.ledger_tx_ref.as_str())
        .bind(i32::try_from(task.attempts).unwrap_or(i32::MAX))
        .bind(task.last_error.as_deref())
        .bind(*task.created_at.as_datetime())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_reconciliations(&self) -> Result<Vec<ReconciliationTask>, StoreError> {
        sqlx::query_as::<_, ReconciliationRow>(
            "SELECT id, kind, ledger_tx_ref, attempts, last_error, created_at
             FROM reconciliation_tasks WHERE resolved_at IS NULL ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ReconciliationRow::into_task)
        .collect()
    }

    async fn resolve_reconciliation(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE reconciliation_tasks SET resolved_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_reconciliation_attempt(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE reconciliation_tasks SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Missing {
                kind: "reconciliation task",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
