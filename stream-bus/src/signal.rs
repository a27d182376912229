//! Signal bridge: turns process signals into a cancellation the drivers can
//! race their blocking waits against.
//!
//! Tokio's signal driver already funnels signals through a self-pipe, so a
//! handler never runs driver code. The bridge listens on that stream and
//! translates:
//! - `SIGINT`, `SIGTERM` → the termination token is cancelled (kill path)
//! - `SIGPIPE` → logged and ignored, a broken sink shows up as a write error
//!
//! Every driver receives an [`Interrupt`], which combines the bridge's token
//! with the supervisor's cancellation token.

use std::fmt::{Display, Formatter};
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    BrokenPipe,
    Other(i32),
}

impl Signal {
    pub fn is_termination(self) -> bool {
        matches!(self, Signal::Interrupt | Signal::Terminate)
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::BrokenPipe => write!(f, "SIGPIPE"),
            Signal::Other(n) => write!(f, "signal {}", n),
        }
    }
}

pub struct SignalBridge {
    terminated: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl SignalBridge {
    /// Bridge without OS hooks; signals arrive only through [`SignalBridge::deliver`].
    pub fn detached() -> Self {
        Self {
            terminated: CancellationToken::new(),
            listener: None,
        }
    }

    /// Register the process signal handlers and start translating.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigpipe = signal(SignalKind::pipe())?;

        let mut bridge = Self::detached();
        let terminated = bridge.terminated.clone();
        bridge.listener = Some(tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    Some(_) = sigint.recv() => Signal::Interrupt,
                    Some(_) = sigterm.recv() => Signal::Terminate,
                    Some(_) = sigpipe.recv() => Signal::BrokenPipe,
                    else => break,
                };
                translate(&terminated, signal);
            }
        }));
        Ok(bridge)
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        let mut bridge = Self::detached();
        let terminated = bridge.terminated.clone();
        bridge.listener = Some(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                translate(&terminated, Signal::Interrupt);
            }
        }));
        Ok(bridge)
    }

    /// Feed a signal through the same translation the OS listener uses.
    pub fn deliver(&self, signal: Signal) {
        translate(&self.terminated, signal);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Interrupt context for one driver.
    pub fn interrupt(&self, cancel: CancellationToken) -> Interrupt {
        Interrupt {
            signal: self.terminated.clone(),
            cancel,
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

fn translate(terminated: &CancellationToken, signal: Signal) {
    if signal.is_termination() {
        log::info!("Caught {}, terminating", signal);
        terminated.cancel();
    } else {
        log::debug!("Caught {}, ignored", signal);
    }
}

/// Why a wait was cut short.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interruption {
    /// A termination signal arrived.
    Signal,
    /// The supervisor asked the driver to stop.
    Cancelled,
}

/// Cancellation context handed to each driver.
#[derive(Clone)]
pub struct Interrupt {
    signal: CancellationToken,
    cancel: CancellationToken,
}

impl Interrupt {
    /// Context that is never signalled; cancellation only.
    pub fn cancel_only(cancel: CancellationToken) -> Self {
        Self {
            signal: CancellationToken::new(),
            cancel,
        }
    }

    /// Race an I/O wait against termination signals and cancellation.
    pub async fn io<F: Future>(&self, fut: F) -> Result<F::Output, Interruption> {
        tokio::select! {
            biased;
            _ = self.signal.cancelled() => Err(Interruption::Signal),
            _ = self.cancel.cancelled() => Err(Interruption::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Race a queue wait against cancellation only. Ready data wins.
    pub async fn queue<F: Future>(&self, fut: F) -> Result<F::Output, Interruption> {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = self.cancel.cancelled() => Err(Interruption::Cancelled),
        }
    }

    /// Sleep for the retry delay; both signals and cancellation cut it short.
    pub async fn delay(&self, duration: std::time::Duration) -> Result<(), Interruption> {
        self.io(tokio::time::sleep(duration)).await
    }

    pub fn is_signalled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
