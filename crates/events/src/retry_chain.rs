//! Per-command retry policy for the message-bus deployment.
//!
//! A [`RetryChain`] maps failure kinds to a two-tier policy:
//!
//! 1. **Cooldown**: short fixed delays, retried in place while the runner still
//!    holds the message. Only applies before the first scheduled retry.
//! 2. **Scheduled**: longer delays; the message goes back to the bus and is
//!    redelivered (possibly to another consumer) after the delay.
//! 3. **Dead-letter** once both tiers are used up.
//!
//! Kinds without a rule dead-letter on first failure. [`FailureKind::Cancelled`]
//! is never retried or dead-lettered: the runner abandons the message and the
//! bus redelivers it when its lock expires.
//!
//! Chains are built once at startup with [`RetryChainBuilder`] and injected
//! into the runner. An empty table is a configuration error, so a runner can
//! never exist without retry protection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::FailureKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryChainError {
    #[error("retry policy for `{command}` has no rules")]
    Empty { command: &'static str },

    #[error("retry policy for `{command}` retries permanent failure kind `{kind}`")]
    PermanentKind {
        command: &'static str,
        kind: FailureKind,
    },

    #[error("retry policy for `{command}` must not list `cancelled`")]
    CancelledKind { command: &'static str },

    #[error("retry policy for `{command}` has more than one rule for `{kind}`")]
    DuplicateKind {
        command: &'static str,
        kind: FailureKind,
    },

    #[error("retry policy for `{command}` has a rule with no retries")]
    EmptyTiers { command: &'static str },
}

/// Delays for both tiers of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTiers {
    cooldown: Vec<Duration>,
    scheduled: Vec<Duration>,
}

impl RetryTiers {
    pub fn new(cooldown: Vec<Duration>, scheduled: Vec<Duration>) -> Self {
        Self { cooldown, scheduled }
    }

    pub fn cooldown(&self) -> &[Duration] {
        &self.cooldown
    }

    pub fn scheduled(&self) -> &[Duration] {
        &self.scheduled
    }

    fn is_empty(&self) -> bool {
        self.cooldown.is_empty() && self.scheduled.is_empty()
    }
}

/// What the runner should do after a failed attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then retry in place.
    Cooldown(Duration),
    /// Hand the message back to the bus for redelivery after the delay.
    Schedule(Duration),
    DeadLetter,
    /// Leave the message for the bus to redeliver.
    Abandon,
}

#[derive(Debug, Clone)]
pub struct RetryChain {
    command: &'static str,
    rules: BTreeMap<FailureKind, Arc<RetryTiers>>,
}

impl RetryChain {
    pub fn builder(command: &'static str) -> RetryChainBuilder {
        RetryChainBuilder {
            command,
            rules: Vec::new(),
        }
    }

    pub fn command(&self) -> &'static str {
        self.command
    }

    pub fn tiers_for(&self, kind: FailureKind) -> Option<&RetryTiers> {
        self.rules.get(&kind).map(Arc::as_ref)
    }

    /// Decide the next step.
    ///
    /// `cooldown_attempts` counts in-place retries already made for this
    /// delivery; `scheduled_attempts` is the bus message's scheduled counter.
    pub fn decide(
        &self,
        kind: FailureKind,
        cooldown_attempts: usize,
        scheduled_attempts: u32,
    ) -> RetryDecision {
        if kind == FailureKind::Cancelled {
            return RetryDecision::Abandon;
        }

        let Some(tiers) = self.tiers_for(kind) else {
            return RetryDecision::DeadLetter;
        };

        if scheduled_attempts == 0 {
            if let Some(delay) = tiers.cooldown.get(cooldown_attempts) {
                return RetryDecision::Cooldown(*delay);
            }
        }

        match tiers.scheduled.get(scheduled_attempts as usize) {
            Some(delay) => RetryDecision::Schedule(*delay),
            None => RetryDecision::DeadLetter,
        }
    }
}

#[derive(Debug)]
pub struct RetryChainBuilder {
    command: &'static str,
    rules: Vec<(Vec<FailureKind>, RetryTiers)>,
}

impl RetryChainBuilder {
    /// Retry `kinds` with `tiers`.
    pub fn on(mut self, kinds: impl IntoIterator<Item = FailureKind>, tiers: RetryTiers) -> Self {
        self.rules.push((kinds.into_iter().collect(), tiers));
        self
    }

    pub fn build(self) -> Result<RetryChain, RetryChainError> {
        let command = self.command;
        let mut rules = BTreeMap::new();

        for (kinds, tiers) in self.rules {
            if tiers.is_empty() {
                return Err(RetryChainError::EmptyTiers { command });
            }

            let tiers = Arc::new(tiers);
            for kind in kinds {
                if kind == FailureKind::Cancelled {
                    return Err(RetryChainError::CancelledKind { command });
                }
                if kind.is_permanent() {
                    return Err(RetryChainError::PermanentKind { command, kind });
                }
                if rules.insert(kind, Arc::clone(&tiers)).is_some() {
                    return Err(RetryChainError::DuplicateKind { command, kind });
                }
            }
        }

        if rules.is_empty() {
            return Err(RetryChainError::Empty { command });
        }

        Ok(RetryChain { command, rules })
    }
}
