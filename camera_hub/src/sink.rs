//! Alert sinks
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::events::AlertEvent;
use crate::traits::AlertSink;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    #[error("alert queue is full")]
    Full,
    #[error("alert consumer has gone away")]
    Disconnected,
}

/// Bounded in-process queue between workers and whatever forwards alerts.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<AlertEvent>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<AlertEvent>) {
        let (tx, rx) = bounded(capacity);
        (ChannelSink { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn publish(&self, event: AlertEvent) -> Result<(), PublishError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => PublishError::Full,
            TrySendError::Disconnected(_) => PublishError::Disconnected,
        })
    }
}
