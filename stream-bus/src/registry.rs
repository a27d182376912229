//! Termination registry: where finished drivers report their outcome.
//!
//! ```text
//! InputDriver  ─┐
//! OutputDriver ─┼─► Registration::complete(status) ─► entries (Mutex) ─► notify
//! OutputDriver ─┘                                                          │
//!                                            Supervisor::run ◄─ wait_beyond(seen)
//! ```
//!
//! Each driver holds a [`Registration`]. Dropping it appends the entry, so a
//! driver that panics still shows up (as an I/O failure) and the supervisor
//! never waits for a report that cannot come.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::endpoint::ExitStatus;

/// Which driver an entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverId {
    Input,
    Output(usize),
}

/// A finished driver's report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    pub id: DriverId,
    pub name: String,
    pub status: ExitStatus,
}

pub struct TerminationRegistry {
    entries: Mutex<Vec<Termination>>,
    changed: Notify,
    expected: usize,
}

impl TerminationRegistry {
    /// Registry for `expected` drivers (outputs + 1).
    pub fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::with_capacity(expected)),
            changed: Notify::new(),
            expected,
        })
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Handle a driver uses to report exactly once.
    pub fn enroll(self: &Arc<Self>, id: DriverId, name: impl Into<String>) -> Registration {
        Registration {
            registry: Arc::clone(self),
            id,
            name: name.into(),
            status: None,
        }
    }

    fn append(&self, termination: Termination) {
        let mut entries = self.lock();
        if entries.len() >= self.expected {
            log::error!(
                "Registry: unexpected report from {} beyond {} drivers",
                termination.name,
                self.expected
            );
        }
        entries.push(termination);
        self.changed.notify_waiters();
    }

    /// Wait until more than `seen` entries exist and return all of them.
    pub async fn wait_beyond(&self, seen: usize) -> Vec<Termination> {
        loop {
            let mut notified = pin!(self.changed.notified());
            // Registered before the check, so an append in between is not missed.
            notified.as_mut().enable();
            {
                let entries = self.lock();
                if entries.len() > seen {
                    return entries.clone();
                }
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> Vec<Termination> {
        self.lock().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().len() >= self.expected
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Termination>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Appends a driver's [`Termination`] when dropped.
pub struct Registration {
    registry: Arc<TerminationRegistry>,
    id: DriverId,
    name: String,
    status: Option<ExitStatus>,
}

impl Registration {
    pub fn id(&self) -> DriverId {
        self.id
    }

    /// Report the final status; this is the driver's last act.
    pub fn complete(mut self, status: ExitStatus) {
        self.status = Some(status);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let status = match self.status {
            Some(status) => status,
            None => {
                log::error!("{}: driver ended without reporting", self.name);
                ExitStatus::IoError
            }
        };
        self.registry.append(Termination {
            id: self.id,
            name: std::mem::take(&mut self.name),
            status,
        });
    }
}
