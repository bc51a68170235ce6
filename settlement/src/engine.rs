//! Settlement coordinator
//!
//! Orchestrates the full validation flow: precondition checks in a fixed
//! order, attempt recording, the atomic settlement commit, and the
//! post-commit side effects (notifications, audit, metrics).
//!
//! Precondition order is part of the contract. Each check is a distinct
//! failure mode, and a request that fails the code comparison always leaves
//! a durable failed attempt behind before the error surfaces.

use crate::{
    audit::{AuditEntry, AuditEventType, AuditSink},
    config::EngineConfig,
    notify::{Notification, Notifier},
    stats,
    types::{CodeInfo, CodeStats, IssuedCode, SettlementOutcome, StatsPeriod, SweepReport,
        ValidationRequest},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use uuid::Uuid;
use validation_core::{
    codegen::DrawSource,
    lockout::LockoutPolicy,
    types::{normalize_code, ActorId, DeliveryStatus, LedgerCredit, Role, ValidationAttempt},
    Clock, CodeGenerator, Metrics, SettlementCommit, SettlementStore,
};

/// Commission owed for a settled delivery, rounded half-away-from-zero to
/// two decimal places
pub fn commission_for(price: Decimal, rate: Decimal) -> Decimal {
    (price * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Settlement engine
pub struct SettlementEngine<S: SettlementStore> {
    /// Durable store
    store: Arc<S>,

    /// Code generator
    generator: CodeGenerator,

    /// Lockout policy
    lockout: LockoutPolicy,

    /// Outbound notifications
    notifier: Arc<dyn Notifier>,

    /// Audit trail
    audit: Arc<dyn AuditSink>,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Configuration
    config: EngineConfig,

    /// Metrics collector
    metrics: Metrics,
}

impl<S: SettlementStore> SettlementEngine<S> {
    /// Create new settlement engine
    pub fn new(
        store: Arc<S>,
        config: EngineConfig,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let lockout = LockoutPolicy {
            max_failures: config.lockout.max_failures,
            window: Duration::minutes(config.lockout.window_minutes),
        };
        let generator = CodeGenerator::new(clock.clone());
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self {
            store,
            generator,
            lockout,
            notifier,
            audit,
            clock,
            config,
            metrics,
        })
    }

    /// Replace the generator's draw source (tests)
    pub fn with_draw_source(mut self, draws: Arc<dyn DrawSource>) -> Self {
        self.generator = CodeGenerator::new(self.clock.clone()).with_draw_source(draws);
        self
    }

    /// Metrics collector for this engine
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Generate and persist a validation code for a delivery.
    ///
    /// The delivery must exist and be in transit; codes are issued at
    /// dispatch, not before pickup and not after completion.
    pub fn generate_code(
        &self,
        delivery_id: Uuid,
        announcement_id: Uuid,
        expiration_hours: Option<i64>,
    ) -> Result<IssuedCode> {
        let delivery = self.store.get_delivery(delivery_id)?;
        if delivery.status != DeliveryStatus::InTransit {
            return Err(Error::Conflict {
                delivery_id,
                status: delivery.status.to_string(),
            });
        }

        let hours = expiration_hours.unwrap_or(self.config.default_expiration_hours);
        let code = match self
            .generator
            .generate(self.store.as_ref(), delivery_id, announcement_id, hours)
        {
            Ok(code) => code,
            Err(e @ validation_core::Error::GenerationExhausted { .. }) => {
                self.metrics.record_generation_exhausted();
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.metrics.record_code_generated();
        self.append_audit(
            AuditEntry::new(
                AuditEventType::CodeGenerated,
                &ActorId::new("dispatch"),
                self.clock.now(),
            )
            .with_delivery(delivery_id)
            .with_code(code.code_id),
        );

        Ok(IssuedCode {
            code_id: code.code_id,
            code: code.code,
            delivery_id,
            expires_at: code.expires_at,
        })
    }

    /// Validate a code and, on a match, settle the delivery atomically.
    pub fn validate(&self, request: ValidationRequest) -> Result<SettlementOutcome> {
        let now = self.clock.now();
        let delivery = self.store.get_delivery(request.delivery_id)?;

        // 1. Authorization: assigned courier, owning client, or admin
        let authorized = match request.role {
            Role::Admin => true,
            Role::Courier => request.actor == delivery.courier,
            Role::Client => request.actor == delivery.client,
        };
        if !authorized {
            return Err(Error::Authorization {
                actor: request.actor.to_string(),
                delivery_id: request.delivery_id,
            });
        }

        // 2. Delivery state
        if delivery.status != DeliveryStatus::InTransit {
            return Err(Error::Conflict {
                delivery_id: request.delivery_id,
                status: delivery.status.to_string(),
            });
        }

        // 3. Lockout gate
        let attempts = self.store.attempts_for_delivery(request.delivery_id)?;
        let decision = self.lockout.evaluate(&attempts, now);
        if !decision.allowed {
            self.metrics.record_lockout();
            self.append_audit(
                AuditEntry::new(AuditEventType::LockoutTriggered, &request.actor, now)
                    .with_delivery(request.delivery_id),
            );
            let window_end = decision.window_end.unwrap_or_else(|| now + self.lockout.window);
            tracing::warn!(
                delivery_id = %request.delivery_id,
                actor = %request.actor,
                window_end = %window_end,
                "Validation attempt rejected by lockout"
            );
            return Err(Error::RateLimited { window_end });
        }

        // 4. Code comparison. Wrong, expired, consumed, and bound-to-another-
        // delivery codes are indistinguishable to the caller.
        let normalized = normalize_code(&request.code);
        let matched = self
            .store
            .find_active(&normalized, now)?
            .filter(|c| c.delivery_id == request.delivery_id);

        let code = match matched {
            Some(code) => code,
            None => {
                let remaining =
                    self.record_failure(request.delivery_id, &request.actor, &normalized, now)?;
                return Err(Error::InvalidCode { remaining });
            }
        };

        // Code matched: build the settlement and commit it atomically.
        let final_status = if request.issues.is_empty() {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::DeliveredWithIssues
        };
        let commission = commission_for(delivery.price, self.config.commission_rate);
        let commit = SettlementCommit {
            code_id: code.code_id,
            delivery_id: request.delivery_id,
            actor: request.actor.clone(),
            final_status,
            proof: request.proof.clone(),
            issues: request.issues.clone(),
            credit: LedgerCredit {
                credit_id: Uuid::new_v4(),
                beneficiary: delivery.courier.clone(),
                delivery_id: request.delivery_id,
                amount: commission,
                credited_at: now,
            },
            // Rides the commit batch, so a settled delivery always carries
            // its success record even if the process dies right after.
            attempt: ValidationAttempt {
                attempt_id: Uuid::now_v7(),
                delivery_id: request.delivery_id,
                attempted_code: normalized.clone(),
                success: true,
                attempted_at: now,
                attempted_by: request.actor.clone(),
            },
            settled_at: now,
        };

        match self.store.commit_settlement(&commit) {
            Ok(()) => {}
            Err(validation_core::Error::CodeConsumed(_)) => {
                // Lost the race: the code was consumed between lookup and
                // commit. Same caller-visible outcome as a wrong code.
                let remaining =
                    self.record_failure(request.delivery_id, &request.actor, &normalized, now)?;
                return Err(Error::InvalidCode { remaining });
            }
            Err(validation_core::Error::StatusConflict {
                delivery_id,
                status,
            }) => {
                self.record_failure(delivery_id, &request.actor, &normalized, now)?;
                return Err(Error::Conflict {
                    delivery_id,
                    status: status.to_string(),
                });
            }
            Err(e) => {
                // Nothing persisted; the caller may retry with the same code.
                tracing::error!(
                    delivery_id = %request.delivery_id,
                    error = %e,
                    "Settlement commit failed"
                );
                return Err(Error::Transaction(e.to_string()));
            }
        }

        // Committed. Side effects below are best-effort and never unwind
        // the settlement.
        self.metrics.record_attempt(true);
        self.metrics
            .record_settlement(commission.to_f64().unwrap_or(0.0));

        self.notifier.notify(Notification::DeliveryCompleted {
            recipient: delivery.client.clone(),
            delivery_id: request.delivery_id,
            with_issues: final_status == DeliveryStatus::DeliveredWithIssues,
        });
        self.notifier.notify(Notification::CommissionPaid {
            recipient: delivery.courier.clone(),
            delivery_id: request.delivery_id,
            amount: commission,
        });

        self.append_audit(
            AuditEntry::new(AuditEventType::ValidationSucceeded, &request.actor, now)
                .with_delivery(request.delivery_id)
                .with_code(code.code_id)
                .with_detail(serde_json::json!({
                    "final_status": final_status.to_string(),
                    "issue_count": request.issues.len(),
                    "commission": commission.to_string(),
                })),
        );

        tracing::info!(
            delivery_id = %request.delivery_id,
            code_id = %code.code_id,
            status = %final_status,
            commission = %commission,
            "Delivery settled"
        );

        Ok(SettlementOutcome {
            delivery_id: request.delivery_id,
            status: final_status,
            commission,
            code_id: code.code_id,
            settled_at: now,
        })
    }

    /// Code details for the owning client or an administrator.
    ///
    /// The clear code value is never surfaced to the courier.
    pub fn code_info(&self, code: &str, actor: &ActorId, role: Role) -> Result<CodeInfo> {
        let normalized = normalize_code(code);
        let found = self
            .store
            .find_by_code(&normalized)?
            .ok_or_else(|| Error::NotFound(format!("code {}", normalized)))?;
        let delivery = self.store.get_delivery(found.delivery_id)?;

        let visible = match role {
            Role::Admin => true,
            Role::Client => *actor == delivery.client,
            Role::Courier => false,
        };
        if !visible {
            return Err(Error::Authorization {
                actor: actor.to_string(),
                delivery_id: found.delivery_id,
            });
        }

        let now = self.clock.now();
        Ok(CodeInfo {
            code_id: found.code_id,
            code: found.code.clone(),
            delivery_id: found.delivery_id,
            is_used: found.is_used,
            is_expired: found.is_expired(now),
            created_at: found.created_at,
            expires_at: found.expires_at,
            used_at: found.used_at,
        })
    }

    /// Administratively revoke a code. Never settles anything.
    ///
    /// Returns `false` if the code was already consumed or revoked.
    pub fn revoke_code(
        &self,
        code_id: Uuid,
        actor: &ActorId,
        role: Role,
        reason: &str,
    ) -> Result<bool> {
        // Role alone decides; no row is read before the check, so a
        // non-admin cannot probe which code ids exist.
        if role != Role::Admin {
            return Err(Error::Authorization {
                actor: actor.to_string(),
                delivery_id: Uuid::nil(),
            });
        }

        let code = self.store.get_code(code_id)?;
        let now = self.clock.now();
        let revoked = self.store.revoke_code(code_id, actor, reason, now)?;

        if revoked {
            self.append_audit(
                AuditEntry::new(AuditEventType::CodeRevoked, actor, now)
                    .with_delivery(code.delivery_id)
                    .with_code(code_id)
                    .with_detail(serde_json::json!({ "reason": reason })),
            );
            tracing::info!(code_id = %code_id, actor = %actor, "Code revoked");
        }

        Ok(revoked)
    }

    /// Run one maintenance pass: reclaim expired unused codes past the grace
    /// period and purge attempts past retention. Idempotent.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let grace = Duration::days(self.config.sweeper.grace_days);
        let codes_deleted = self.store.sweep_expired(now, grace)?;

        let cutoff = now - Duration::days(self.config.sweeper.attempt_retention_days);
        let attempts_purged = self.store.purge_attempts_before(cutoff)?;

        self.metrics.record_swept(codes_deleted);
        self.append_audit(
            AuditEntry::new(AuditEventType::SweepCompleted, &ActorId::new("sweeper"), now)
                .with_detail(serde_json::json!({
                    "codes_deleted": codes_deleted,
                    "attempts_purged": attempts_purged,
                })),
        );
        tracing::info!(codes_deleted, attempts_purged, "Maintenance sweep complete");

        Ok(SweepReport {
            codes_deleted,
            attempts_purged,
        })
    }

    /// Aggregate code statistics over a trailing period
    pub fn stats(&self, period: StatsPeriod) -> Result<CodeStats> {
        let now = self.clock.now();
        let codes = self.store.codes_created_since(now - period.duration())?;
        Ok(stats::aggregate(period, &codes, now))
    }

    /// Durably record a failed attempt, then recompute the remaining budget
    /// so the caller sees the count including this failure.
    fn record_failure(
        &self,
        delivery_id: Uuid,
        actor: &ActorId,
        attempted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let attempt = ValidationAttempt {
            attempt_id: Uuid::now_v7(),
            delivery_id,
            attempted_code: attempted_code.to_string(),
            success: false,
            attempted_at: now,
            attempted_by: actor.clone(),
        };
        self.store
            .record_attempt(&attempt)
            .map_err(|e| Error::Transaction(e.to_string()))?;

        self.metrics.record_attempt(false);
        self.append_audit(
            AuditEntry::new(AuditEventType::ValidationFailed, actor, now)
                .with_delivery(delivery_id),
        );

        let attempts = self.store.attempts_for_delivery(delivery_id)?;
        Ok(self.lockout.evaluate(&attempts, now).remaining)
    }

    fn append_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(entry) {
            tracing::warn!(error = %e, "Audit append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::JsonlAuditLog;
    use crate::notify::TracingNotifier;
    use validation_core::clock::ManualClock;
    use validation_core::types::Delivery;
    use validation_core::{AttemptLedger, Config, DeliveryStore, Storage};

    fn engine_with_storage() -> (
        SettlementEngine<Storage>,
        Arc<Storage>,
        Arc<ManualClock>,
        tempfile::TempDir,
    ) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().join("db");
        let storage = Arc::new(Storage::open(&config).unwrap());

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let audit = Arc::new(
            JsonlAuditLog::open(temp_dir.path().join("audit.log")).unwrap(),
        );
        let engine = SettlementEngine::new(
            storage.clone(),
            EngineConfig::default(),
            Arc::new(TracingNotifier),
            audit,
            clock.clone(),
        )
        .unwrap();

        (engine, storage, clock, temp_dir)
    }

    fn seed_delivery(storage: &Storage, status: DeliveryStatus, price: Decimal) -> Delivery {
        let delivery = Delivery {
            delivery_id: Uuid::new_v4(),
            announcement_id: Uuid::new_v4(),
            client: ActorId::new("client-1"),
            courier: ActorId::new("courier-1"),
            status,
            price,
            validated_at: None,
            completed_at: None,
            proof: None,
            issues: vec![],
        };
        storage.put_delivery(&delivery).unwrap();
        delivery
    }

    #[test]
    fn test_commission_rounding() {
        let rate = Decimal::new(10, 2);
        assert_eq!(commission_for(Decimal::new(4500, 2), rate), Decimal::new(450, 2));
        assert_eq!(commission_for(Decimal::new(1999, 2), rate), Decimal::new(200, 2));
        assert_eq!(commission_for(Decimal::new(25, 2), rate), Decimal::new(3, 2));
        assert_eq!(commission_for(Decimal::ZERO, rate), Decimal::ZERO);
    }

    #[test]
    fn test_generate_requires_in_transit() {
        let (engine, storage, _clock, _temp) = engine_with_storage();
        let delivery = seed_delivery(&storage, DeliveryStatus::Accepted, Decimal::new(4500, 2));

        let result = engine.generate_code(delivery.delivery_id, delivery.announcement_id, None);
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[test]
    fn test_generate_unknown_delivery_is_not_found() {
        let (engine, _storage, _clock, _temp) = engine_with_storage();
        let result = engine.generate_code(Uuid::new_v4(), Uuid::new_v4(), None);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_stranger_is_rejected_before_code_check() {
        let (engine, storage, _clock, _temp) = engine_with_storage();
        let delivery = seed_delivery(&storage, DeliveryStatus::InTransit, Decimal::new(4500, 2));
        let issued = engine
            .generate_code(delivery.delivery_id, delivery.announcement_id, None)
            .unwrap();

        let result = engine.validate(ValidationRequest {
            delivery_id: delivery.delivery_id,
            code: issued.code,
            actor: ActorId::new("courier-99"),
            role: Role::Courier,
            proof: None,
            issues: vec![],
        });
        assert!(matches!(result, Err(Error::Authorization { .. })));

        // No attempt recorded for an unauthorized caller
        let attempts = storage.attempts_for_delivery(delivery.delivery_id).unwrap();
        assert!(attempts.is_empty());
    }

    #[test]
    fn test_client_may_validate_own_delivery() {
        let (engine, storage, _clock, _temp) = engine_with_storage();
        let delivery = seed_delivery(&storage, DeliveryStatus::InTransit, Decimal::new(4500, 2));
        let issued = engine
            .generate_code(delivery.delivery_id, delivery.announcement_id, None)
            .unwrap();

        let outcome = engine
            .validate(ValidationRequest {
                delivery_id: delivery.delivery_id,
                code: issued.code,
                actor: ActorId::new("client-1"),
                role: Role::Client,
                proof: None,
                issues: vec![],
            })
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_code_info_hidden_from_courier() {
        let (engine, storage, _clock, _temp) = engine_with_storage();
        let delivery = seed_delivery(&storage, DeliveryStatus::InTransit, Decimal::new(4500, 2));
        let issued = engine
            .generate_code(delivery.delivery_id, delivery.announcement_id, None)
            .unwrap();

        let denied = engine.code_info(&issued.code, &ActorId::new("courier-1"), Role::Courier);
        assert!(matches!(denied, Err(Error::Authorization { .. })));

        let info = engine
            .code_info(&issued.code, &ActorId::new("client-1"), Role::Client)
            .unwrap();
        assert_eq!(info.code, issued.code);
        assert!(!info.is_used);
        assert!(!info.is_expired);

        let admin_view = engine
            .code_info(&issued.code, &ActorId::new("admin-1"), Role::Admin)
            .unwrap();
        assert_eq!(admin_view.code_id, issued.code_id);
    }

    #[test]
    fn test_revoke_is_admin_only_and_blocks_settlement() {
        let (engine, storage, _clock, _temp) = engine_with_storage();
        let delivery = seed_delivery(&storage, DeliveryStatus::InTransit, Decimal::new(4500, 2));
        let issued = engine
            .generate_code(delivery.delivery_id, delivery.announcement_id, None)
            .unwrap();

        let denied = engine.revoke_code(
            issued.code_id,
            &ActorId::new("client-1"),
            Role::Client,
            "changed my mind",
        );
        assert!(matches!(denied, Err(Error::Authorization { .. })));

        // A non-admin gets the same answer for a code id that does not
        // exist; existence never leaks through the error
        let denied_missing = engine.revoke_code(
            Uuid::new_v4(),
            &ActorId::new("client-1"),
            Role::Client,
            "changed my mind",
        );
        assert!(matches!(denied_missing, Err(Error::Authorization { .. })));

        assert!(engine
            .revoke_code(issued.code_id, &ActorId::new("admin-1"), Role::Admin, "lost")
            .unwrap());

        // Second revocation is a no-op
        assert!(!engine
            .revoke_code(issued.code_id, &ActorId::new("admin-1"), Role::Admin, "again")
            .unwrap());

        // The revoked code no longer validates
        let result = engine.validate(ValidationRequest {
            delivery_id: delivery.delivery_id,
            code: issued.code,
            actor: ActorId::new("courier-1"),
            role: Role::Courier,
            proof: None,
            issues: vec![],
        });
        assert!(matches!(result, Err(Error::InvalidCode { .. })));
    }

    #[test]
    fn test_code_is_trimmed_before_comparison() {
        let (engine, storage, _clock, _temp) = engine_with_storage();
        let delivery = seed_delivery(&storage, DeliveryStatus::InTransit, Decimal::new(4500, 2));
        let issued = engine
            .generate_code(delivery.delivery_id, delivery.announcement_id, None)
            .unwrap();

        let outcome = engine
            .validate(ValidationRequest {
                delivery_id: delivery.delivery_id,
                code: format!("  {}\n", issued.code),
                actor: ActorId::new("courier-1"),
                role: Role::Courier,
                proof: None,
                issues: vec![],
            })
            .unwrap();
        assert_eq!(outcome.code_id, issued.code_id);
    }
}
