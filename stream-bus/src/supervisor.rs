//! Supervisor: spawns one driver per endpoint, watches the termination
//! registry and computes the overall outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{ExitStatus, StreamConfig};
use crate::input::InputDriver;
use crate::output::OutputDriver;
use crate::queue::{BoundedQueue, DEFAULT_SLOTS, DEFAULT_SLOT_SIZE};
use crate::registry::{DriverId, Termination, TerminationRegistry};
use crate::signal::SignalBridge;

/// Runtime tunables shared by every driver.
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Ring slots per output queue.
    pub slots: usize,
    /// Payload bytes per slot, also the input's read chunk size.
    pub slot_size: usize,
    /// Pause before a driver with `RetryPolicy::Always` reopens.
    pub retry_delay: Duration,
    /// Only open every endpoint, transfer nothing.
    pub probe: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            slot_size: DEFAULT_SLOT_SIZE,
            retry_delay: Duration::from_secs(1),
            probe: false,
        }
    }
}

impl SupervisorOptions {
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_slot_size(mut self, slot_size: usize) -> Self {
        self.slot_size = slot_size.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }
}

/// Final report of one run, in registration order.
#[derive(Debug)]
pub struct RunReport {
    pub terminations: Vec<Termination>,
    /// Driver tasks that panicked or were aborted.
    pub join_failures: usize,
}

impl RunReport {
    pub fn input(&self) -> Option<&Termination> {
        self.terminations.iter().find(|t| t.id == DriverId::Input)
    }

    pub fn output(&self, index: usize) -> Option<&Termination> {
        self.terminations
            .iter()
            .find(|t| t.id == DriverId::Output(index))
    }

    pub fn status_of(&self, id: DriverId) -> Option<ExitStatus> {
        self.terminations
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
    }

    pub fn is_success(&self) -> bool {
        self.join_failures == 0 && self.terminations.iter().all(|t| t.status.is_clean())
    }

    /// Process exit code: 0 when every endpoint ended clean.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

pub struct Supervisor {
    config: StreamConfig,
    options: SupervisorOptions,
}

impl Supervisor {
    pub fn new(config: StreamConfig, options: SupervisorOptions) -> Self {
        Self { config, options }
    }

    pub async fn run(self, bridge: &SignalBridge) -> RunReport {
        let Supervisor { config, options } = self;
        let registry = TerminationRegistry::new(config.outputs.len() + 1);
        let cancel = CancellationToken::new();

        log::info!(
            "Supervisor: {} -> {} output(s){}",
            config.input,
            config.outputs.len(),
            if options.probe { ", reachability test" } else { "" }
        );

        let mut queues = Vec::with_capacity(config.outputs.len());
        let mut handles = Vec::with_capacity(config.outputs.len() + 1);

        // Outputs first, so every queue has a consumer before data arrives.
        for (index, output) in config.outputs.into_iter().enumerate() {
            let queue = Arc::new(BoundedQueue::with_capacity(
                output.name.clone(),
                options.slots,
                options.slot_size,
            ));
            queues.push(Arc::clone(&queue));
            let registration = registry.enroll(DriverId::Output(index), output.name.clone());
            let driver = OutputDriver::new(
                output,
                queue,
                bridge.interrupt(cancel.clone()),
                registration,
                options.clone(),
            );
            handles.push(tokio::spawn(driver.run()));
        }

        let registration = registry.enroll(DriverId::Input, config.input.name.clone());
        let driver = InputDriver::new(
            config.input,
            queues,
            bridge.interrupt(cancel.clone()),
            registration,
            options.clone(),
        );
        handles.push(tokio::spawn(driver.run()));

        let mut seen = 0;
        while seen < registry.expected() {
            let entries = registry.wait_beyond(seen).await;
            for entry in &entries[seen..] {
                log::debug!("Supervisor: {} reported {}", entry.name, entry.status);
            }
            if !options.probe && !cancel.is_cancelled() {
                if let Some(failed) = entries[seen..].iter().find(|t| !t.status.is_clean()) {
                    log::warn!(
                        "Supervisor: {} ended {}, stopping remaining drivers",
                        failed.name,
                        failed.status
                    );
                    cancel.cancel();
                }
            }
            seen = entries.len();
        }

        let join_failures = join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.err())
            .inspect(|e| log::error!("Supervisor: driver task failed: {}", e))
            .count();

        let report = RunReport {
            terminations: registry.snapshot(),
            join_failures,
        };
        for termination in &report.terminations {
            log::info!("Supervisor: {} {}", termination.name, termination.status);
        }
        report
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
