use async_trait::async_trait;
use daq_model::StatusUpdate;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Outbound side of the cluster manager connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_update(&self, update: &StatusUpdate) -> Result<(), TransportError>;

    async fn send_message(&self, data: Value) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    /// Records everything sent; can be switched into failing mode.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryTransport {
        pub(crate) updates: Mutex<Vec<StatusUpdate>>,
        pub(crate) messages: Mutex<Vec<Value>>,
        failing: AtomicBool,
    }

    impl MemoryTransport {
        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub(crate) fn updates(&self) -> Vec<StatusUpdate> {
            self.updates.lock().unwrap().clone()
        }

        pub(crate) fn messages(&self) -> Vec<Value> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_update(&self, update: &StatusUpdate) -> Result<(), TransportError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Send("link down".into()));
            }
            self.updates.lock().unwrap().push(update.clone());
            Ok(())
        }

        async fn send_message(&self, data: Value) -> Result<(), TransportError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Send("link down".into()));
            }
            self.messages.lock().unwrap().push(data);
            Ok(())
        }
    }
}
