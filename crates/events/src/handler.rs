use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backoff::Classify;
use crate::bus::BusMessage;
use crate::command::Command;

/// Handles one command type on the message bus.
///
/// Handlers report failures through an error that can be classified; what to
/// do about a failure (retry now, retry later, dead-letter) is decided by the
/// [`crate::CommandRunner`] and the command's [`crate::RetryChain`], never by
/// the handler.
///
/// `cancel` fires on host shutdown. A handler that observes it should return
/// an error classified as [`crate::FailureKind::Cancelled`].
#[async_trait]
pub trait CommandHandler: Send + Sync {
    type Cmd: Command;
    type Error: Classify + core::fmt::Display + core::fmt::Debug + Send + Sync + 'static;

    /// Handle one delivery of `message`. The message's correlation id should be
    /// carried onto any follow-up commands.
    async fn handle(
        &self,
        message: &BusMessage<Self::Cmd>,
        cancel: &CancellationToken,
    ) -> Result<(), Self::Error>;
}
