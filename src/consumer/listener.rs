//! The downstream side of a consumer: whoever receives each unit of work.

use std::io;

use thiserror::Error;

use crate::producer::ProduceError;
use crate::types::Message;

/// Why a listener did not accept a message.
///
/// Any error marks the file as failed for this cycle; what happens to it
/// next depends on the consumer's release mode.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("I/O error while handling message: {0}")]
    Io(#[from] io::Error),

    #[error("failed to relay message: {0}")]
    Produce(#[from] ProduceError),
}

/// Receives the messages built from consumed files.
///
/// Called from a blocking thread, once per file, while the consumer's cycle
/// lock is held.
pub trait Listener: Send + Sync {
    fn on_message(&self, message: Message) -> Result<(), DispatchError>;
}

impl<F> Listener for F
where
    F: Fn(Message) -> Result<(), DispatchError> + Send + Sync,
{
    fn on_message(&self, message: Message) -> Result<(), DispatchError> {
        self(message)
    }
}
