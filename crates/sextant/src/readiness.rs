//! Readiness of the server's analyzer and indexer.
//!
//! Each flag is monotone within a connection: it flips to `true` on the
//! matching event and stays there until the connection is torn down, when
//! both flags reset together. Readiness can change between a UI event and the
//! command it triggers, so callers check it right before acting.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sextant_protocol::ServerEvent;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};

/// A server subsystem with its own readiness flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Presentation compiler: type-checking, type and symbol queries.
    Analyzer,
    /// Classpath index: symbol search, imports, refactoring.
    Indexer,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyzer => f.write_str("analyzer"),
            Self::Indexer => f.write_str("indexer"),
        }
    }
}

/// Point-in-time copy of both flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadinessState {
    /// Analyzer flag.
    pub analyzer_ready: bool,
    /// Indexer flag.
    pub indexer_ready: bool,
}

/// The two readiness flags of one session.
#[derive(Debug, Default)]
pub struct Readiness {
    analyzer: AtomicBool,
    indexer: AtomicBool,
    changed: Notify,
}

impl Readiness {
    /// Both flags start false.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, subsystem: Subsystem) -> &AtomicBool {
        match subsystem {
            Subsystem::Analyzer => &self.analyzer,
            Subsystem::Indexer => &self.indexer,
        }
    }

    /// Current value of one flag.
    #[must_use]
    pub fn is_ready(&self, subsystem: Subsystem) -> bool {
        self.flag(subsystem).load(Ordering::Acquire)
    }

    /// Shorthand for the analyzer flag.
    #[must_use]
    pub fn analyzer_ready(&self) -> bool {
        self.is_ready(Subsystem::Analyzer)
    }

    /// Shorthand for the indexer flag.
    #[must_use]
    pub fn indexer_ready(&self) -> bool {
        self.is_ready(Subsystem::Indexer)
    }

    /// Both flags at once.
    #[must_use]
    pub fn snapshot(&self) -> ReadinessState {
        ReadinessState {
            analyzer_ready: self.analyzer_ready(),
            indexer_ready: self.indexer_ready(),
        }
    }

    /// Set a flag. Returns `true` if it was previously unset.
    pub fn mark_ready(&self, subsystem: Subsystem) -> bool {
        let was_ready = self.flag(subsystem).swap(true, Ordering::AcqRel);
        if !was_ready {
            debug!(%subsystem, "Subsystem ready");
            self.changed.notify_waiters();
        }
        !was_ready
    }

    /// Apply a server event. Returns the subsystem that became ready, if any.
    pub fn apply(&self, event: &ServerEvent) -> Option<Subsystem> {
        let subsystem = match event {
            ServerEvent::AnalyzerReady => Subsystem::Analyzer,
            ServerEvent::IndexerReady => Subsystem::Indexer,
            _ => return None,
        };
        self.mark_ready(subsystem).then_some(subsystem)
    }

    /// Reset both flags. Called exactly on disconnect.
    pub fn reset(&self) {
        self.analyzer.store(false, Ordering::Release);
        self.indexer.store(false, Ordering::Release);
        self.changed.notify_waiters();
    }

    /// Fail with [`Error::NotReady`] unless the flag is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] naming the subsystem.
    pub fn require(&self, subsystem: Subsystem) -> Result<()> {
        if self.is_ready(subsystem) {
            Ok(())
        } else {
            Err(Error::NotReady(subsystem))
        }
    }

    /// Wait until a flag is set, up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the deadline passes first.
    pub async fn wait_for(&self, subsystem: Subsystem, timeout: Duration) -> Result<()> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_ready(subsystem) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::NotReady(subsystem))
    }
}
