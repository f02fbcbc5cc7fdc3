//! # Progress and Cancellation
//!
//! A pass reports one [`ProgressEvent`] per page through a [`ProgressSink`]
//! and checks a [`CancelToken`] before each page request.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use wms_core::{EntityKind, Source};

/// Running totals after a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTotals {
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub failed: u32,
}

/// One step of a pass, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub source: Source,
    pub entity: EntityKind,
    pub page: u32,
    /// Human-readable status line.
    pub message: String,
    pub totals: ProgressTotals,
}

/// Where progress events go. Sending never blocks a pass.
#[derive(Debug, Clone, Default)]
pub enum ProgressSink {
    #[default]
    Disabled,
    Channel(mpsc::UnboundedSender<ProgressEvent>),
}

impl ProgressSink {
    /// Sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressSink::Channel(tx), rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let ProgressSink::Channel(tx) = self {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

/// Cancellation signal checked at page boundaries.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled (manual runs).
    pub fn never() -> Self {
        CancelToken { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Owner side of a [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx: Some(rx) })
    }

    /// Another token tied to this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}
