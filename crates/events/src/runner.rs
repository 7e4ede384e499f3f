//! Runs bus commands through their handler under a [`RetryChain`].
//!
//! One call to [`CommandRunner::run`] is one delivery of one bus message:
//!
//! ```text
//! handle ──ok──────────────────────────────▶ Handled
//!    │
//!    └─err─▶ chain.decide(kind, cooldowns, scheduled_attempts)
//!              ├─ Cooldown(d)  sleep d, handle again
//!              ├─ Schedule(d)  bus.schedule(message.rescheduled(), d) ▶ Rescheduled
//!              ├─ DeadLetter   bus.dead_letter(message, reason)       ▶ DeadLettered
//!              └─ Abandon      nothing                                ▶ Abandoned
//! ```
//!
//! Bus errors while scheduling or dead-lettering propagate; the bus then
//! redelivers the original message.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::Classify;
use crate::bus::{BusError, BusMessage, MessageBus};
use crate::command::Command;
use crate::handler::CommandHandler;
use crate::retry_chain::{RetryChain, RetryDecision};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Handler succeeded after `attempts` tries in this delivery.
    Handled { attempts: usize },
    Rescheduled { delay: Duration },
    DeadLettered { reason: String },
    /// Shutdown observed; the message stays with the bus.
    Abandoned,
}

pub struct CommandRunner<H, B> {
    handler: H,
    bus: B,
    chain: RetryChain,
}

impl<H, B> CommandRunner<H, B>
where
    H: CommandHandler,
    B: MessageBus<H::Cmd>,
{
    pub fn new(handler: H, bus: B, chain: RetryChain) -> Self {
        Self { handler, bus, chain }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn chain(&self) -> &RetryChain {
        &self.chain
    }

    pub async fn run(
        &self,
        message: BusMessage<H::Cmd>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, BusError> {
        let command = <H::Cmd as Command>::NAME;
        let mut cooldowns = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Ok(CommandOutcome::Abandoned);
            }

            let err = match self.handler.handle(&message, cancel).await {
                Ok(()) => {
                    return Ok(CommandOutcome::Handled {
                        attempts: cooldowns + 1,
                    });
                }
                Err(err) => err,
            };

            let kind = err.failure_kind();
            match self.chain.decide(kind, cooldowns, message.scheduled_attempts()) {
                RetryDecision::Cooldown(delay) => {
                    tracing::debug!(
                        command,
                        correlation_id = %message.correlation_id(),
                        kind = %kind,
                        attempt = cooldowns + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "command failed, cooling down"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(CommandOutcome::Abandoned),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    cooldowns += 1;
                }
                RetryDecision::Schedule(delay) => {
                    let next = message.rescheduled();
                    tracing::warn!(
                        command,
                        correlation_id = %message.correlation_id(),
                        kind = %kind,
                        scheduled_attempts = next.scheduled_attempts(),
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "command failed, scheduling retry"
                    );
                    self.bus.schedule(next, delay).await?;
                    return Ok(CommandOutcome::Rescheduled { delay });
                }
                RetryDecision::DeadLetter => {
                    let reason = format!("{kind}: {err}");
                    tracing::error!(
                        command,
                        correlation_id = %message.correlation_id(),
                        kind = %kind,
                        permanent = kind.is_permanent(),
                        scheduled_attempts = message.scheduled_attempts(),
                        error = %err,
                        "command dead-lettered"
                    );
                    self.bus.dead_letter(message, reason.clone()).await?;
                    return Ok(CommandOutcome::DeadLettered { reason });
                }
                RetryDecision::Abandon => {
                    tracing::info!(
                        command,
                        correlation_id = %message.correlation_id(),
                        "command abandoned on cancellation"
                    );
                    return Ok(CommandOutcome::Abandoned);
                }
            }
        }
    }
}
