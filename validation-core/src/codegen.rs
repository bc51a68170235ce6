//! Validation code generation
//!
//! Produces unique, non-guessable 6-digit codes bound to one delivery.
//! Candidates come from a cryptographically strong source and pass a
//! structural filter (no monotonic runs, no repeated digit, no deny-listed
//! value) before a uniqueness check against active codes. The draw loop is
//! strictly bounded so generation fails fast under contention instead of
//! spinning.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::CodeStore;
use crate::types::ValidationCode;
use chrono::Duration;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Code length in digits
pub const CODE_LEN: usize = 6;

/// Default code lifetime in hours
pub const DEFAULT_EXPIRATION_HOURS: i64 = 24;

/// Total draws before generation gives up
const MAX_DRAWS: u32 = 10;

/// Common/trivial values rejected regardless of structure
const DENY_LIST: &[&str] = &[
    "000000", "111111", "123456", "654321", "999999", "112233", "123123", "121212", "123321",
    "101010",
];

/// Source of raw 6-digit draws, in `0..1_000_000`
///
/// Production draws from the OS entropy pool; tests script the sequence.
pub trait DrawSource: Send + Sync {
    /// Draw one candidate value
    fn draw(&self) -> u32;
}

/// Draws from the operating system's CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsDrawSource;

impl DrawSource for OsDrawSource {
    fn draw(&self) -> u32 {
        OsRng.gen_range(0..1_000_000)
    }
}

/// Check whether a 6-digit value is structurally guessable.
///
/// Rejects the 10 strictly monotonic digit runs (ascending or descending),
/// fully repeating strings, and the fixed deny-list. Anything that is not
/// exactly 6 ASCII digits is weak by definition.
pub fn is_weak_code(code: &str) -> bool {
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }

    if DENY_LIST.contains(&code) {
        return true;
    }

    let digits: Vec<i16> = code.bytes().map(|b| i16::from(b - b'0')).collect();

    if digits.iter().all(|&d| d == digits[0]) {
        return true;
    }

    let ascending = digits.windows(2).all(|w| w[1] - w[0] == 1);
    let descending = digits.windows(2).all(|w| w[0] - w[1] == 1);

    ascending || descending
}

/// Validation code generator
pub struct CodeGenerator {
    draws: Arc<dyn DrawSource>,
    clock: Arc<dyn Clock>,
}

impl CodeGenerator {
    /// Create a generator drawing from the OS entropy pool
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            draws: Arc::new(OsDrawSource),
            clock,
        }
    }

    /// Replace the draw source (tests)
    pub fn with_draw_source(mut self, draws: Arc<dyn DrawSource>) -> Self {
        self.draws = draws;
        self
    }

    /// Generate and persist a code for a delivery.
    ///
    /// Every draw counts against the bound, whether it was rejected for
    /// structure or for colliding with an active code, so the loop stays
    /// bounded under load. Exhaustion returns
    /// [`Error::GenerationExhausted`]; the caller decides whether to retry.
    pub fn generate(
        &self,
        store: &dyn CodeStore,
        delivery_id: Uuid,
        announcement_id: Uuid,
        expiration_hours: i64,
    ) -> Result<ValidationCode> {
        let now = self.clock.now();

        for draw in 0..MAX_DRAWS {
            let candidate = format!("{:06}", self.draws.draw());

            if is_weak_code(&candidate) {
                tracing::debug!(draw, "Discarded structurally weak candidate");
                continue;
            }

            if store.find_active(&candidate, now)?.is_some() {
                tracing::debug!(draw, "Candidate collides with an active code");
                continue;
            }

            let mut metadata = HashMap::new();
            metadata.insert("source".to_string(), "dispatch".to_string());
            metadata.insert(
                "expiration_hours".to_string(),
                expiration_hours.to_string(),
            );

            let code = ValidationCode {
                code_id: Uuid::new_v4(),
                code: candidate,
                delivery_id,
                announcement_id,
                is_used: false,
                created_at: now,
                expires_at: now + Duration::hours(expiration_hours),
                used_at: None,
                used_by: None,
                metadata,
            };

            // The store re-checks uniqueness under its own lock; a concurrent
            // insert of the same value shows up here as DuplicateCode and
            // consumes the draw like any other collision.
            match store.insert_code(&code) {
                Ok(()) => {
                    tracing::debug!(
                        code_id = %code.code_id,
                        delivery_id = %delivery_id,
                        expires_at = %code.expires_at,
                        "Validation code generated"
                    );
                    return Ok(code);
                }
                Err(Error::DuplicateCode) => continue,
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            delivery_id = %delivery_id,
            attempts = MAX_DRAWS,
            "Code generation exhausted"
        );
        Err(Error::GenerationExhausted {
            attempts: MAX_DRAWS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::storage::Storage;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Draw source replaying a fixed script, then falling back to the OS
    struct ScriptedDraws {
        script: Mutex<Vec<u32>>,
    }

    impl ScriptedDraws {
        fn new(mut values: Vec<u32>) -> Self {
            values.reverse();
            Self {
                script: Mutex::new(values),
            }
        }
    }

    impl DrawSource for ScriptedDraws {
        fn draw(&self) -> u32 {
            self.script.lock().pop().unwrap_or_else(|| OsDrawSource.draw())
        }
    }

    fn test_storage() -> (Storage, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    #[test]
    fn test_weak_rejects_malformed() {
        assert!(is_weak_code(""));
        assert!(is_weak_code("12345"));
        assert!(is_weak_code("1234567"));
        assert!(is_weak_code("12a456"));
        assert!(is_weak_code(" 12345"));
    }

    #[test]
    fn test_weak_rejects_monotonic_runs() {
        // All 10 strictly monotonic runs
        for start in 0..=4u8 {
            let ascending: String = (start..start + 6).map(|d| (b'0' + d) as char).collect();
            let descending: String = ascending.chars().rev().collect();
            assert!(is_weak_code(&ascending), "{}", ascending);
            assert!(is_weak_code(&descending), "{}", descending);
        }
    }

    #[test]
    fn test_weak_rejects_repeats_and_deny_list() {
        for d in 0..=9u8 {
            let repeated: String = std::iter::repeat((b'0' + d) as char).take(6).collect();
            assert!(is_weak_code(&repeated), "{}", repeated);
        }
        assert!(is_weak_code("123123"));
        assert!(is_weak_code("112233"));
    }

    #[test]
    fn test_weak_accepts_ordinary_codes() {
        assert!(!is_weak_code("482913"));
        assert!(!is_weak_code("907461"));
        assert!(!is_weak_code("135790")); // monotonic but not step-1
        assert!(!is_weak_code("122345")); // near-run with a repeat
    }

    #[test]
    fn test_generate_persists_active_code() {
        let (storage, _temp) = test_storage();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let generator = CodeGenerator::new(clock.clone());

        let delivery_id = Uuid::new_v4();
        let code = generator
            .generate(&storage, delivery_id, Uuid::new_v4(), DEFAULT_EXPIRATION_HOURS)
            .unwrap();

        assert_eq!(code.code.len(), CODE_LEN);
        assert!(!is_weak_code(&code.code));
        assert_eq!(code.expires_at, clock.now() + Duration::hours(24));

        let found = storage.find_active(&code.code, clock.now()).unwrap();
        assert_eq!(found.unwrap().code_id, code.code_id);
    }

    #[test]
    fn test_weak_draws_are_discarded_never_persisted() {
        let (storage, _temp) = test_storage();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let generator = CodeGenerator::new(clock.clone()).with_draw_source(Arc::new(
            ScriptedDraws::new(vec![123_456, 123_456, 123_456, 482_913]),
        ));

        let code = generator
            .generate(&storage, Uuid::new_v4(), Uuid::new_v4(), 24)
            .unwrap();

        assert_eq!(code.code, "482913");
        assert!(storage.find_active("123456", clock.now()).unwrap().is_none());
    }

    #[test]
    fn test_generation_exhausts_on_weak_only_source() {
        let (storage, _temp) = test_storage();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let generator = CodeGenerator::new(clock)
            .with_draw_source(Arc::new(ScriptedDraws::new(vec![123_456; 10])));

        let result = generator.generate(&storage, Uuid::new_v4(), Uuid::new_v4(), 24);
        assert!(matches!(
            result,
            Err(Error::GenerationExhausted { attempts: 10 })
        ));
    }

    #[test]
    fn test_duplicate_active_value_consumes_draws() {
        let (storage, _temp) = test_storage();
        let clock = Arc::new(ManualClock::new(Utc::now()));

        // First generation takes 482913
        let first = CodeGenerator::new(clock.clone())
            .with_draw_source(Arc::new(ScriptedDraws::new(vec![482_913])));
        first
            .generate(&storage, Uuid::new_v4(), Uuid::new_v4(), 24)
            .unwrap();

        // Second draws the same value, then a fresh one
        let second = CodeGenerator::new(clock.clone())
            .with_draw_source(Arc::new(ScriptedDraws::new(vec![482_913, 907_461])));
        let code = second
            .generate(&storage, Uuid::new_v4(), Uuid::new_v4(), 24)
            .unwrap();

        assert_eq!(code.code, "907461");
    }
}
