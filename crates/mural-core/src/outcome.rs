//! Write-outcome interpretation
//!
//! Turns the raw response of one write into a classification and then into
//! a disposition for the agent: its next-eligible instant, whether it stays
//! live, and whether the same intention is retried.
//!
//! Every computed next-eligible instant carries a uniform random jitter in
//! `[0, jitter_max)` so that agents do not fire in synchronized bursts.

use crate::agent::Liveness;
use crate::config::FleetConfig;
use crate::error::TransportError;
use crate::remote::WriteResponse;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// Rate-limit timestamp, in seconds, that marks a banned account (`i32::MAX`)
pub const BANNED_SENTINEL_SECS: i64 = 2_147_483_647;

/// Rejection message for a rate-limited write
pub const RATE_LIMITED_MESSAGE: &str = "Ratelimited";

/// Rejection message for an account that may not write
pub const UNVERIFIED_MESSAGE: &str = "unable to verify user";

/// Classified result of one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Pixel placed
    Success,
    /// Refused until `next_available`, or for an unspecified time if `None`
    RateLimited {
        /// Server-supplied next-available instant
        next_available: Option<DateTime<Utc>>,
    },
    /// Account banned
    Banned,
    /// Account not allowed to write
    Unverified,
    /// Request did not complete
    TransportFailure(TransportError),
}

impl WriteOutcome {
    /// Classify a raw write result
    #[must_use]
    pub fn classify(result: Result<WriteResponse, TransportError>) -> Self {
        match result {
            Err(e) => Self::TransportFailure(e),
            Ok(WriteResponse::Placed { .. }) => Self::Success,
            Ok(WriteResponse::Rejected {
                message,
                next_available_ms,
            }) => {
                if message == UNVERIFIED_MESSAGE {
                    return Self::Unverified;
                }
                if message != RATE_LIMITED_MESSAGE {
                    tracing::warn!(message = %message, "unrecognised rejection, treating as rate limit");
                }
                match next_available_ms {
                    Some(ms) if ms / 1000 == BANNED_SENTINEL_SECS => Self::Banned,
                    Some(ms) => Self::RateLimited {
                        next_available: DateTime::from_timestamp_millis(ms),
                    },
                    None => Self::RateLimited {
                        next_available: None,
                    },
                }
            }
        }
    }

    /// Short label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited { .. } => "rate_limited",
            Self::Banned => "banned",
            Self::Unverified => "unverified",
            Self::TransportFailure(_) => "transport_failure",
        }
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited {
                next_available: Some(at),
            } => write!(f, "rate_limited until {at}"),
            Self::TransportFailure(e) => write!(f, "transport_failure: {e}"),
            other => f.write_str(other.kind()),
        }
    }
}

/// How an outcome changes the agent's cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownChange {
    /// Fresh schedule after a successful write; replaces the cooldown
    Reset(DateTime<Utc>),
    /// Push the cooldown forward, never back
    Advance(DateTime<Utc>),
    /// Leave it alone
    Keep,
}

/// What happens to the agent after one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    /// Cooldown update
    pub cooldown: CooldownChange,
    /// Liveness after the outcome
    pub liveness: Liveness,
    /// Whether the same intention is retried right away
    pub retry: bool,
}

impl Disposition {
    /// Instant the agent becomes eligible again, if it stays live
    #[must_use]
    pub fn next_eligible(&self) -> Option<DateTime<Utc>> {
        match self.cooldown {
            CooldownChange::Reset(at) | CooldownChange::Advance(at) => Some(at),
            CooldownChange::Keep => None,
        }
    }
}

/// Derives dispositions from outcomes
#[derive(Debug)]
pub struct OutcomeInterpreter {
    base_cooldown_ms: u64,
    jitter_max_ms: u64,
    rng: Mutex<StdRng>,
}

impl OutcomeInterpreter {
    /// Create an interpreter with entropy-seeded jitter
    #[must_use]
    pub fn new(base_cooldown_ms: u64, jitter_max_ms: u64) -> Self {
        Self {
            base_cooldown_ms,
            jitter_max_ms,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create an interpreter with reproducible jitter
    #[must_use]
    pub fn seeded(base_cooldown_ms: u64, jitter_max_ms: u64, seed: u64) -> Self {
        Self {
            base_cooldown_ms,
            jitter_max_ms,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Create from the fleet configuration
    #[must_use]
    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.base_cooldown_ms, config.jitter_max_ms)
    }

    /// Upper bound (exclusive) of the jitter, in milliseconds
    #[inline]
    #[must_use]
    pub fn jitter_max_ms(&self) -> u64 {
        self.jitter_max_ms
    }

    /// Cooldown after a successful write, without jitter
    #[inline]
    #[must_use]
    pub fn base_cooldown_ms(&self) -> u64 {
        self.base_cooldown_ms
    }

    /// Draw one jitter value in `[0, jitter_max)`
    pub fn jitter_ms(&self) -> u64 {
        if self.jitter_max_ms == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..self.jitter_max_ms)
    }

    /// Disposition for `outcome` observed at `now`
    pub fn interpret(&self, outcome: &WriteOutcome, now: DateTime<Utc>) -> Disposition {
        match outcome {
            WriteOutcome::Success => Disposition {
                cooldown: CooldownChange::Reset(add_ms(
                    now,
                    self.base_cooldown_ms.saturating_add(self.jitter_ms()),
                )),
                liveness: Liveness::Live,
                retry: false,
            },
            WriteOutcome::RateLimited { next_available } => {
                let at = match next_available {
                    Some(at) => add_ms(*at, self.jitter_ms()),
                    None => add_ms(now, self.base_cooldown_ms.saturating_add(self.jitter_ms())),
                };
                Disposition {
                    cooldown: CooldownChange::Advance(at),
                    liveness: Liveness::Live,
                    retry: false,
                }
            }
            WriteOutcome::Banned => Disposition {
                cooldown: CooldownChange::Keep,
                liveness: Liveness::Banned,
                retry: false,
            },
            WriteOutcome::Unverified => Disposition {
                cooldown: CooldownChange::Keep,
                liveness: Liveness::Unverified,
                retry: false,
            },
            WriteOutcome::TransportFailure(_) => Disposition {
                cooldown: CooldownChange::Advance(now),
                liveness: Liveness::Live,
                retry: true,
            },
        }
    }
}

/// `at + ms`, saturating at the latest representable instant
pub(crate) fn add_ms(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 300_000;
    const JITTER: u64 = 60_000;

    fn rejected(message: &str, next_available_ms: Option<i64>) -> Result<WriteResponse, TransportError> {
        Ok(WriteResponse::Rejected {
            message: message.to_string(),
            next_available_ms,
        })
    }

    #[test]
    fn test_classify_placed() {
        let outcome = WriteOutcome::classify(Ok(WriteResponse::Placed { timestamp_ms: None }));
        assert_eq!(outcome, WriteOutcome::Success);
    }

    #[test]
    fn test_classify_rate_limited() {
        let outcome = WriteOutcome::classify(rejected("Ratelimited", Some(1_700_000_000_000)));
        assert_eq!(
            outcome,
            WriteOutcome::RateLimited {
                next_available: DateTime::from_timestamp_millis(1_700_000_000_000),
            }
        );
    }

    #[test]
    fn test_classify_ban_sentinel() {
        let sentinel_ms = BANNED_SENTINEL_SECS * 1000;
        assert_eq!(
            WriteOutcome::classify(rejected("Ratelimited", Some(sentinel_ms))),
            WriteOutcome::Banned
        );
        assert_eq!(
            WriteOutcome::classify(rejected("Ratelimited", Some(sentinel_ms + 999))),
            WriteOutcome::Banned
        );
    }

    #[test]
    fn test_classify_unverified() {
        assert_eq!(
            WriteOutcome::classify(rejected("unable to verify user", None)),
            WriteOutcome::Unverified
        );
    }

    #[test]
    fn test_classify_unknown_message() {
        assert_eq!(
            WriteOutcome::classify(rejected("something else", None)),
            WriteOutcome::RateLimited {
                next_available: None
            }
        );
    }

    #[test]
    fn test_classify_transport() {
        let outcome = WriteOutcome::classify(Err(TransportError::Timeout { after_ms: 10 }));
        assert_eq!(
            outcome,
            WriteOutcome::TransportFailure(TransportError::Timeout { after_ms: 10 })
        );
        assert_eq!(outcome.to_string(), "transport_failure: timed out after 10ms");
    }

    #[test]
    fn test_success_schedules_base_plus_jitter() {
        let interpreter = OutcomeInterpreter::seeded(BASE, JITTER, 7);
        let now = Utc::now();
        for _ in 0..50 {
            let disposition = interpreter.interpret(&WriteOutcome::Success, now);
            let CooldownChange::Reset(at) = disposition.cooldown else {
                panic!("success must reset the cooldown");
            };
            let waited = (at - now).num_milliseconds();
            assert!(waited >= 300_000 && waited < 360_000, "waited {waited}ms");
            assert!(!disposition.retry);
            assert_eq!(disposition.liveness, Liveness::Live);
        }
    }

    #[test]
    fn test_rate_limit_uses_server_timestamp() {
        let interpreter = OutcomeInterpreter::seeded(BASE, JITTER, 7);
        let server = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let disposition = interpreter.interpret(
            &WriteOutcome::RateLimited {
                next_available: Some(server),
            },
            Utc::now(),
        );
        let CooldownChange::Advance(at) = disposition.cooldown else {
            panic!("rate limit must advance the cooldown");
        };
        assert!(at >= server);
        assert!(at < server + TimeDelta::milliseconds(60_000));
    }

    #[test]
    fn test_terminal_outcomes() {
        let interpreter = OutcomeInterpreter::seeded(BASE, JITTER, 7);
        let now = Utc::now();

        let banned = interpreter.interpret(&WriteOutcome::Banned, now);
        assert_eq!(banned.liveness, Liveness::Banned);
        assert_eq!(banned.next_eligible(), None);

        let unverified = interpreter.interpret(&WriteOutcome::Unverified, now);
        assert_eq!(unverified.liveness, Liveness::Unverified);
        assert!(!unverified.retry);
    }

    #[test]
    fn test_transport_failure_retries_now() {
        let interpreter = OutcomeInterpreter::seeded(BASE, JITTER, 7);
        let now = Utc::now();
        let disposition =
            interpreter.interpret(&WriteOutcome::TransportFailure(TransportError::Closed), now);
        assert!(disposition.retry);
        assert_eq!(disposition.cooldown, CooldownChange::Advance(now));
    }

    #[test]
    fn test_zero_jitter() {
        let interpreter = OutcomeInterpreter::seeded(1000, 0, 1);
        assert_eq!(interpreter.jitter_ms(), 0);
    }

    #[test]
    fn test_add_ms_saturates() {
        let now = Utc::now();
        assert_eq!(add_ms(now, u64::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
