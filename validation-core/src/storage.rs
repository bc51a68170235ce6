//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `codes` - Validation code rows (key: code_id)
//! - `code_index` - Active/latest code value → code_id
//! - `delivery_index` - delivery_id → code_id
//! - `attempts` - Append-only attempt log (key: delivery_id || attempt_id)
//! - `deliveries` - Delivery rows, stored as JSON (key: delivery_id)
//! - `credits` - Commission credits (key: beneficiary || '|' || credit_id)
//! - `wallets` - Running total earnings (key: beneficiary)
//!
//! Delivery rows carry opaque `serde_json::Value` payloads (proof/issues),
//! which a non-self-describing format cannot round-trip, so they are stored
//! as JSON; every other row is bincode.
//!
//! The settlement commit is one `WriteBatch` guarded by a per-delivery lock:
//! the `is_used` transition only succeeds if the row is still unused when
//! the batch is built, so of two racing validations exactly one commits.

use crate::{
    config::Config,
    error::{Error, Result},
    store::{
        AttemptLedger, CodeStore, DeliveryStore, SettlementCommit, SettlementStore, WalletLedger,
    },
    types::{
        ActorId, Delivery, DeliveryStatus, LedgerCredit, ValidationAttempt, ValidationCode,
        REVOKED_BY_KEY, REVOKED_KEY,
    },
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_CODES: &str = "codes";
const CF_CODE_INDEX: &str = "code_index";
const CF_DELIVERY_INDEX: &str = "delivery_index";
const CF_ATTEMPTS: &str = "attempts";
const CF_DELIVERIES: &str = "deliveries";
const CF_CREDITS: &str = "credits";
const CF_WALLETS: &str = "wallets";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Serializes inserts so the active-value uniqueness check holds
    insert_lock: Mutex<()>,

    /// Per-delivery commit locks; makes the used-flag transition conditional
    settle_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_CODES, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_CODE_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_DELIVERY_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_ATTEMPTS, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_DELIVERIES, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_CREDITS, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_index()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened validation store");

        Ok(Self {
            db: Arc::new(db),
            insert_lock: Mutex::new(()),
            settle_locks: DashMap::new(),
        })
    }

    fn cf_options_compressed() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn delivery_lock(&self, delivery_id: Uuid) -> Arc<Mutex<()>> {
        self.settle_locks
            .entry(delivery_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock map entry once no other thread holds a clone. A thread
    /// that cloned before the check keeps the entry alive; one arriving after
    /// the removal creates a fresh entry through [`Self::delivery_lock`].
    fn release_delivery_lock(&self, delivery_id: Uuid, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.settle_locks
            .remove_if(&delivery_id, |_, entry| Arc::strong_count(entry) == 1);
    }

    // Key helpers

    fn attempt_key(delivery_id: Uuid, attempt_id: Uuid) -> Vec<u8> {
        let mut key = delivery_id.as_bytes().to_vec();
        key.extend_from_slice(attempt_id.as_bytes());
        key
    }

    fn credit_key(beneficiary: &ActorId, credit_id: Uuid) -> Vec<u8> {
        let mut key = beneficiary.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(credit_id.as_bytes());
        key
    }

    fn load_code(&self, code_id: Uuid) -> Result<Option<ValidationCode>> {
        let cf = self.cf_handle(CF_CODES)?;
        match self.db.get_cf(cf, code_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn revoke_code_locked(
        &self,
        code_id: Uuid,
        actor: &ActorId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Re-read under the lock
        let mut code = self.get_code(code_id)?;
        if code.is_used {
            return Ok(false);
        }

        code.is_used = true;
        code.used_at = Some(now);
        code.metadata
            .insert(REVOKED_KEY.to_string(), reason.to_string());
        code.metadata
            .insert(REVOKED_BY_KEY.to_string(), actor.as_str().to_string());

        let cf_codes = self.cf_handle(CF_CODES)?;
        self.db
            .put_cf(cf_codes, code.code_id.as_bytes(), bincode::serialize(&code)?)?;

        tracing::info!(code_id = %code_id, actor = %actor, "Code revoked");

        Ok(true)
    }

    fn commit_settlement_locked(&self, commit: &SettlementCommit) -> Result<()> {
        // Conditional checks under the per-delivery lock: the loser of a
        // race observes rows that no longer satisfy the preconditions.
        let mut code = self.get_code(commit.code_id)?;
        if code.is_used {
            return Err(Error::CodeConsumed(commit.code_id));
        }

        let mut delivery = self.get_delivery(commit.delivery_id)?;
        if delivery.status != DeliveryStatus::InTransit {
            return Err(Error::StatusConflict {
                delivery_id: commit.delivery_id,
                status: delivery.status,
            });
        }

        code.is_used = true;
        code.used_at = Some(commit.settled_at);
        code.used_by = Some(commit.actor.clone());

        delivery.status = commit.final_status;
        delivery.validated_at = Some(commit.settled_at);
        delivery.completed_at = Some(commit.settled_at);
        delivery.proof = commit.proof.clone();
        delivery.issues = commit.issues.clone();

        let new_total = self.total_earnings(&commit.credit.beneficiary)? + commit.credit.amount;

        let cf_codes = self.cf_handle(CF_CODES)?;
        let cf_deliveries = self.cf_handle(CF_DELIVERIES)?;
        let cf_attempts = self.cf_handle(CF_ATTEMPTS)?;
        let cf_credits = self.cf_handle(CF_CREDITS)?;
        let cf_wallets = self.cf_handle(CF_WALLETS)?;

        // All rows change or none do, the success attempt included
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_codes, code.code_id.as_bytes(), bincode::serialize(&code)?);
        batch.put_cf(
            cf_deliveries,
            delivery.delivery_id.as_bytes(),
            serde_json::to_vec(&delivery)?,
        );
        batch.put_cf(
            cf_attempts,
            Self::attempt_key(commit.attempt.delivery_id, commit.attempt.attempt_id),
            bincode::serialize(&commit.attempt)?,
        );
        batch.put_cf(
            cf_credits,
            Self::credit_key(&commit.credit.beneficiary, commit.credit.credit_id),
            bincode::serialize(&commit.credit)?,
        );
        batch.put_cf(
            cf_wallets,
            commit.credit.beneficiary.as_str().as_bytes(),
            bincode::serialize(&new_total)?,
        );
        self.db.write(batch)?;

        tracing::info!(
            delivery_id = %commit.delivery_id,
            code_id = %commit.code_id,
            status = %commit.final_status,
            commission = %commit.credit.amount,
            "Settlement committed"
        );

        Ok(())
    }
}

impl CodeStore for Storage {
    fn insert_code(&self, code: &ValidationCode) -> Result<()> {
        let _guard = self.insert_lock.lock();

        // Final uniqueness check under the lock: the indexed row may be a
        // historical (used/expired/revoked) holder of this value, which is
        // fine to displace.
        let cf_index = self.cf_handle(CF_CODE_INDEX)?;
        if let Some(existing_id) = self.db.get_cf(cf_index, code.code.as_bytes())? {
            let existing_id = Uuid::from_slice(&existing_id)
                .map_err(|e| Error::Storage(format!("Corrupt code index: {}", e)))?;
            if let Some(existing) = self.load_code(existing_id)? {
                if existing.is_active(code.created_at) {
                    return Err(Error::DuplicateCode);
                }
            }
        }

        let cf_codes = self.cf_handle(CF_CODES)?;
        let cf_delivery = self.cf_handle(CF_DELIVERY_INDEX)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_codes, code.code_id.as_bytes(), bincode::serialize(code)?);
        batch.put_cf(cf_index, code.code.as_bytes(), code.code_id.as_bytes());
        batch.put_cf(
            cf_delivery,
            code.delivery_id.as_bytes(),
            code.code_id.as_bytes(),
        );
        self.db.write(batch)?;

        tracing::debug!(code_id = %code.code_id, delivery_id = %code.delivery_id, "Code inserted");

        Ok(())
    }

    fn get_code(&self, code_id: Uuid) -> Result<ValidationCode> {
        self.load_code(code_id)?
            .ok_or_else(|| Error::CodeNotFound(code_id.to_string()))
    }

    fn find_active(&self, code: &str, now: DateTime<Utc>) -> Result<Option<ValidationCode>> {
        match self.find_by_code(code)? {
            Some(row) if row.is_active(now) => Ok(Some(row)),
            _ => Ok(None),
        }
    }

    fn find_by_code(&self, code: &str) -> Result<Option<ValidationCode>> {
        let cf_index = self.cf_handle(CF_CODE_INDEX)?;
        let Some(code_id) = self.db.get_cf(cf_index, code.as_bytes())? else {
            return Ok(None);
        };
        let code_id = Uuid::from_slice(&code_id)
            .map_err(|e| Error::Storage(format!("Corrupt code index: {}", e)))?;
        self.load_code(code_id)
    }

    fn find_by_delivery(&self, delivery_id: Uuid) -> Result<Option<ValidationCode>> {
        let cf_delivery = self.cf_handle(CF_DELIVERY_INDEX)?;
        let Some(code_id) = self.db.get_cf(cf_delivery, delivery_id.as_bytes())? else {
            return Ok(None);
        };
        let code_id = Uuid::from_slice(&code_id)
            .map_err(|e| Error::Storage(format!("Corrupt delivery index: {}", e)))?;
        self.load_code(code_id)
    }

    fn revoke_code(
        &self,
        code_id: Uuid,
        actor: &ActorId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let delivery_id = self.get_code(code_id)?.delivery_id;

        // Revocation races against settlement on the same delivery
        let lock = self.delivery_lock(delivery_id);
        let result = {
            let _guard = lock.lock();
            self.revoke_code_locked(code_id, actor, reason, now)
        };
        self.release_delivery_lock(delivery_id, lock);
        result
    }

    fn sweep_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64> {
        let cf_codes = self.cf_handle(CF_CODES)?;
        let cf_index = self.cf_handle(CF_CODE_INDEX)?;
        let cf_delivery = self.cf_handle(CF_DELIVERY_INDEX)?;

        let created_cutoff = now - grace;
        let mut batch = WriteBatch::default();
        let mut deleted = 0u64;

        for item in self.db.iterator_cf(cf_codes, IteratorMode::Start) {
            let (key, value) = item?;
            let code: ValidationCode = bincode::deserialize(&value)?;

            if code.is_used || !code.is_expired(now) || code.created_at > created_cutoff {
                continue;
            }

            batch.delete_cf(cf_codes, &key);

            // Drop each index only if it still points at this row; a
            // reissued code for the same delivery or value has displaced it.
            if let Some(indexed) = self.db.get_cf(cf_delivery, code.delivery_id.as_bytes())? {
                if AsRef::<[u8]>::as_ref(&indexed) == code.code_id.as_bytes() {
                    batch.delete_cf(cf_delivery, code.delivery_id.as_bytes());
                }
            }
            if let Some(indexed) = self.db.get_cf(cf_index, code.code.as_bytes())? {
                if AsRef::<[u8]>::as_ref(&indexed) == code.code_id.as_bytes() {
                    batch.delete_cf(cf_index, code.code.as_bytes());
                }
            }

            deleted += 1;
        }

        if deleted > 0 {
            self.db.write(batch)?;
        }

        Ok(deleted)
    }

    fn codes_created_since(&self, since: DateTime<Utc>) -> Result<Vec<ValidationCode>> {
        let cf_codes = self.cf_handle(CF_CODES)?;

        let mut codes = Vec::new();
        for item in self.db.iterator_cf(cf_codes, IteratorMode::Start) {
            let (_, value) = item?;
            let code: ValidationCode = bincode::deserialize(&value)?;
            if code.created_at >= since {
                codes.push(code);
            }
        }

        Ok(codes)
    }
}

impl AttemptLedger for Storage {
    fn record_attempt(&self, attempt: &ValidationAttempt) -> Result<()> {
        let cf = self.cf_handle(CF_ATTEMPTS)?;
        let key = Self::attempt_key(attempt.delivery_id, attempt.attempt_id);
        self.db.put_cf(cf, key, bincode::serialize(attempt)?)?;

        tracing::debug!(
            delivery_id = %attempt.delivery_id,
            success = attempt.success,
            "Attempt recorded"
        );

        Ok(())
    }

    fn attempts_for_delivery(&self, delivery_id: Uuid) -> Result<Vec<ValidationAttempt>> {
        let cf = self.cf_handle(CF_ATTEMPTS)?;
        let prefix = delivery_id.as_bytes();

        let mut attempts = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            attempts.push(bincode::deserialize(&value)?);
        }

        // UUIDv7 attempt ids keep the key order time-ordered
        Ok(attempts)
    }

    fn purge_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cf = self.cf_handle(CF_ATTEMPTS)?;

        let mut batch = WriteBatch::default();
        let mut deleted = 0u64;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let attempt: ValidationAttempt = bincode::deserialize(&value)?;
            if attempt.attempted_at < cutoff {
                batch.delete_cf(cf, &key);
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.db.write(batch)?;
        }

        Ok(deleted)
    }
}

impl DeliveryStore for Storage {
    fn put_delivery(&self, delivery: &Delivery) -> Result<()> {
        let cf = self.cf_handle(CF_DELIVERIES)?;
        self.db.put_cf(
            cf,
            delivery.delivery_id.as_bytes(),
            serde_json::to_vec(delivery)?,
        )?;
        Ok(())
    }

    fn get_delivery(&self, delivery_id: Uuid) -> Result<Delivery> {
        let cf = self.cf_handle(CF_DELIVERIES)?;
        let value = self
            .db
            .get_cf(cf, delivery_id.as_bytes())?
            .ok_or_else(|| Error::DeliveryNotFound(delivery_id.to_string()))?;
        Ok(serde_json::from_slice(&value)?)
    }
}

impl WalletLedger for Storage {
    fn credits_for(&self, beneficiary: &ActorId) -> Result<Vec<LedgerCredit>> {
        let cf = self.cf_handle(CF_CREDITS)?;
        let mut prefix = beneficiary.as_str().as_bytes().to_vec();
        prefix.push(b'|');

        let mut credits = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            credits.push(bincode::deserialize(&value)?);
        }

        Ok(credits)
    }

    fn total_earnings(&self, beneficiary: &ActorId) -> Result<Decimal> {
        let cf = self.cf_handle(CF_WALLETS)?;
        match self.db.get_cf(cf, beneficiary.as_str().as_bytes())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(Decimal::ZERO),
        }
    }
}

impl SettlementStore for Storage {
    fn commit_settlement(&self, commit: &SettlementCommit) -> Result<()> {
        let lock = self.delivery_lock(commit.delivery_id);
        let result = {
            let _guard = lock.lock();
            self.commit_settlement_locked(commit)
        };
        self.release_delivery_lock(commit.delivery_id, lock);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_code(value: &str, delivery_id: Uuid, now: DateTime<Utc>) -> ValidationCode {
        ValidationCode {
            code_id: Uuid::new_v4(),
            code: value.to_string(),
            delivery_id,
            announcement_id: Uuid::new_v4(),
            is_used: false,
            created_at: now,
            expires_at: now + Duration::hours(24),
            used_at: None,
            used_by: None,
            metadata: HashMap::new(),
        }
    }

    fn test_delivery(delivery_id: Uuid) -> Delivery {
        Delivery {
            delivery_id,
            announcement_id: Uuid::new_v4(),
            client: ActorId::new("client-1"),
            courier: ActorId::new("courier-1"),
            status: DeliveryStatus::InTransit,
            price: Decimal::new(4500, 2), // 45.00
            validated_at: None,
            completed_at: None,
            proof: None,
            issues: vec![],
        }
    }

    fn test_commit(code: &ValidationCode, delivery: &Delivery, now: DateTime<Utc>) -> SettlementCommit {
        SettlementCommit {
            code_id: code.code_id,
            delivery_id: delivery.delivery_id,
            actor: delivery.courier.clone(),
            final_status: DeliveryStatus::Delivered,
            proof: None,
            issues: vec![],
            credit: LedgerCredit {
                credit_id: Uuid::new_v4(),
                beneficiary: delivery.courier.clone(),
                delivery_id: delivery.delivery_id,
                amount: Decimal::new(450, 2), // 4.50
                credited_at: now,
            },
            attempt: ValidationAttempt {
                attempt_id: Uuid::now_v7(),
                delivery_id: delivery.delivery_id,
                attempted_code: code.code.clone(),
                success: true,
                attempted_at: now,
                attempted_by: delivery.courier.clone(),
            },
            settled_at: now,
        }
    }

    #[test]
    fn test_insert_and_find_active() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let code = test_code("482913", Uuid::new_v4(), now);

        storage.insert_code(&code).unwrap();

        let found = storage.find_active("482913", now).unwrap().unwrap();
        assert_eq!(found.code_id, code.code_id);

        // Expired at lookup time
        assert!(storage
            .find_active("482913", now + Duration::hours(25))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_active_value_rejected() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();

        storage
            .insert_code(&test_code("482913", Uuid::new_v4(), now))
            .unwrap();

        let result = storage.insert_code(&test_code("482913", Uuid::new_v4(), now));
        assert!(matches!(result, Err(Error::DuplicateCode)));
    }

    #[test]
    fn test_value_reusable_after_previous_holder_lapses() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();

        storage
            .insert_code(&test_code("482913", Uuid::new_v4(), now))
            .unwrap();

        // A day later the first holder has expired; the value is free again
        let later = now + Duration::hours(25);
        let fresh = test_code("482913", Uuid::new_v4(), later);
        storage.insert_code(&fresh).unwrap();

        let found = storage.find_active("482913", later).unwrap().unwrap();
        assert_eq!(found.code_id, fresh.code_id);
    }

    #[test]
    fn test_find_by_delivery() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery_id = Uuid::new_v4();
        let code = test_code("482913", delivery_id, now);

        storage.insert_code(&code).unwrap();

        let found = storage.find_by_delivery(delivery_id).unwrap().unwrap();
        assert_eq!(found.code_id, code.code_id);
        assert!(storage.find_by_delivery(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_revoke_marks_used_without_settling() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let code = test_code("482913", Uuid::new_v4(), now);
        storage.insert_code(&code).unwrap();

        let admin = ActorId::new("admin-1");
        assert!(storage
            .revoke_code(code.code_id, &admin, "lost package", now)
            .unwrap());

        let revoked = storage.get_code(code.code_id).unwrap();
        assert!(revoked.is_used);
        assert!(revoked.is_revoked());
        assert_eq!(revoked.used_by, None);

        // Second revocation is a no-op
        assert!(!storage
            .revoke_code(code.code_id, &admin, "again", now)
            .unwrap());
    }

    #[test]
    fn test_commit_settlement_atomic_rows() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery = test_delivery(Uuid::new_v4());
        let code = test_code("482913", delivery.delivery_id, now);

        storage.put_delivery(&delivery).unwrap();
        storage.insert_code(&code).unwrap();

        let commit = test_commit(&code, &delivery, now);
        storage.commit_settlement(&commit).unwrap();

        let code_after = storage.get_code(code.code_id).unwrap();
        assert!(code_after.is_used);
        assert_eq!(code_after.used_by, Some(delivery.courier.clone()));

        let delivery_after = storage.get_delivery(delivery.delivery_id).unwrap();
        assert_eq!(delivery_after.status, DeliveryStatus::Delivered);
        assert_eq!(delivery_after.validated_at, Some(now));

        let credits = storage.credits_for(&delivery.courier).unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].amount, Decimal::new(450, 2));
        assert_eq!(
            storage.total_earnings(&delivery.courier).unwrap(),
            Decimal::new(450, 2)
        );

        // The success attempt rides the same batch as the money rows
        let attempts = storage.attempts_for_delivery(delivery.delivery_id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
    }

    #[test]
    fn test_settle_locks_do_not_accumulate() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery = test_delivery(Uuid::new_v4());
        let code = test_code("482913", delivery.delivery_id, now);

        storage.put_delivery(&delivery).unwrap();
        storage.insert_code(&code).unwrap();

        storage
            .commit_settlement(&test_commit(&code, &delivery, now))
            .unwrap();
        assert!(storage.settle_locks.is_empty());

        let other = test_code("907461", Uuid::new_v4(), now);
        storage.insert_code(&other).unwrap();
        storage
            .revoke_code(other.code_id, &ActorId::new("admin-1"), "lost", now)
            .unwrap();
        assert!(storage.settle_locks.is_empty());
    }

    #[test]
    fn test_commit_loses_race_on_consumed_code() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery = test_delivery(Uuid::new_v4());
        let code = test_code("482913", delivery.delivery_id, now);

        storage.put_delivery(&delivery).unwrap();
        storage.insert_code(&code).unwrap();

        let commit = test_commit(&code, &delivery, now);
        storage.commit_settlement(&commit).unwrap();

        // Replay of the same commit observes the consumed code
        let result = storage.commit_settlement(&commit);
        assert!(matches!(result, Err(Error::CodeConsumed(_))));

        // Exactly one credit
        assert_eq!(storage.credits_for(&delivery.courier).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_requires_in_transit() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let mut delivery = test_delivery(Uuid::new_v4());
        delivery.status = DeliveryStatus::Cancelled;
        let code = test_code("482913", delivery.delivery_id, now);

        storage.put_delivery(&delivery).unwrap();
        storage.insert_code(&code).unwrap();

        let result = storage.commit_settlement(&test_commit(&code, &delivery, now));
        assert!(matches!(
            result,
            Err(Error::StatusConflict {
                status: DeliveryStatus::Cancelled,
                ..
            })
        ));

        // Nothing partial applied
        assert!(!storage.get_code(code.code_id).unwrap().is_used);
        assert!(storage.credits_for(&delivery.courier).unwrap().is_empty());
    }

    #[test]
    fn test_attempt_ledger_append_and_scan() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery_id = Uuid::new_v4();

        for i in 0..3 {
            storage
                .record_attempt(&ValidationAttempt {
                    attempt_id: Uuid::now_v7(),
                    delivery_id,
                    attempted_code: format!("00000{}", i),
                    success: false,
                    attempted_at: now + Duration::seconds(i),
                    attempted_by: ActorId::new("courier-1"),
                })
                .unwrap();
        }

        // Unrelated delivery must not leak into the scan
        storage
            .record_attempt(&ValidationAttempt {
                attempt_id: Uuid::now_v7(),
                delivery_id: Uuid::new_v4(),
                attempted_code: "999998".to_string(),
                success: true,
                attempted_at: now,
                attempted_by: ActorId::new("courier-2"),
            })
            .unwrap();

        let attempts = storage.attempts_for_delivery(delivery_id).unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.delivery_id == delivery_id));
    }

    #[test]
    fn test_purge_attempts_before_cutoff() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery_id = Uuid::new_v4();

        for days_ago in [10i64, 8, 2] {
            storage
                .record_attempt(&ValidationAttempt {
                    attempt_id: Uuid::now_v7(),
                    delivery_id,
                    attempted_code: "000001".to_string(),
                    success: false,
                    attempted_at: now - Duration::days(days_ago),
                    attempted_by: ActorId::new("courier-1"),
                })
                .unwrap();
        }

        let purged = storage.purge_attempts_before(now - Duration::days(7)).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(storage.attempts_for_delivery(delivery_id).unwrap().len(), 1);

        // Idempotent
        assert_eq!(
            storage.purge_attempts_before(now - Duration::days(7)).unwrap(),
            0
        );
    }

    #[test]
    fn test_sweep_respects_grace_period() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();

        // Expired 8 days ago: swept
        let mut old = test_code("482913", Uuid::new_v4(), now - Duration::days(9));
        old.expires_at = now - Duration::days(8);
        storage.insert_code(&old).unwrap();

        // Expired yesterday, created 2 days ago: kept for audit correlation
        let mut recent = test_code("907461", Uuid::new_v4(), now - Duration::days(2));
        recent.expires_at = now - Duration::days(1);
        storage.insert_code(&recent).unwrap();

        // Used code: never swept
        let mut used = test_code("314268", Uuid::new_v4(), now - Duration::days(30));
        used.expires_at = now - Duration::days(29);
        used.is_used = true;
        storage.insert_code(&used).unwrap();

        let deleted = storage.sweep_expired(now, Duration::days(7)).unwrap();
        assert_eq!(deleted, 1);

        assert!(storage.load_code(old.code_id).unwrap().is_none());
        assert!(storage.load_code(recent.code_id).unwrap().is_some());
        assert!(storage.load_code(used.code_id).unwrap().is_some());

        // Second sweep is a no-op
        assert_eq!(storage.sweep_expired(now, Duration::days(7)).unwrap(), 0);
    }

    #[test]
    fn test_sweep_keeps_delivery_index_of_reissued_code() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let delivery_id = Uuid::new_v4();

        // First code lapsed past the grace period
        let mut old = test_code("482913", delivery_id, now - Duration::days(9));
        old.expires_at = now - Duration::days(8);
        storage.insert_code(&old).unwrap();

        // Replacement issued for the same delivery, still active
        let fresh = test_code("907461", delivery_id, now);
        storage.insert_code(&fresh).unwrap();

        assert_eq!(storage.sweep_expired(now, Duration::days(7)).unwrap(), 1);
        assert!(storage.load_code(old.code_id).unwrap().is_none());

        // The delivery index still resolves to the replacement
        let found = storage.find_by_delivery(delivery_id).unwrap().unwrap();
        assert_eq!(found.code_id, fresh.code_id);
        assert!(storage.find_active("907461", now).unwrap().is_some());
    }

    #[test]
    fn test_codes_created_since() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();

        storage
            .insert_code(&test_code("482913", Uuid::new_v4(), now - Duration::days(10)))
            .unwrap();
        storage
            .insert_code(&test_code("907461", Uuid::new_v4(), now - Duration::days(1)))
            .unwrap();

        let recent = storage.codes_created_since(now - Duration::days(7)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].code, "907461");
    }
}
