//! Output driver: drains one queue into one sink.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use crate::endpoint::{EndpointConfig, EndpointKind, ExitStatus, Protocol, RetryPolicy};
use crate::error::{Result, StreamError};
use crate::net;
use crate::queue::{BoundedQueue, Chunk};
use crate::registry::Registration;
use crate::signal::{Interrupt, Interruption};
use crate::supervisor::SupervisorOptions;

enum Sink {
    File(tokio::fs::File),
    Tcp(TcpStream),
    Udp { socket: UdpSocket, dest: SocketAddr },
    Stdout(tokio::io::Stdout),
}

impl Sink {
    async fn write(&mut self, interrupt: &Interrupt, endpoint: &str, data: &[u8]) -> Result<()> {
        let written = match self {
            Sink::File(file) => interrupt.io(file.write_all(data)).await?,
            Sink::Tcp(stream) => interrupt.io(stream.write_all(data)).await?,
            Sink::Stdout(stdout) => interrupt.io(stdout.write_all(data)).await?,
            Sink::Udp { socket, dest } => {
                // datagrams are best effort: a failed send loses this chunk only
                match interrupt.io(socket.send_to(data, *dest)).await? {
                    Ok(n) if n < data.len() => {
                        log::warn!("{}: short send {}/{} bytes", endpoint, n, data.len())
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("{}: send to {} failed, chunk dropped: {}", endpoint, dest, e),
                }
                return Ok(());
            }
        };
        written.map_err(|e| StreamError::io(endpoint, e))
    }

    /// Push buffered bytes out; a failure here means data was lost.
    async fn flush(&mut self, interrupt: &Interrupt, endpoint: &str) -> Result<()> {
        let flushed = match self {
            Sink::File(file) => interrupt.io(file.flush()).await?,
            Sink::Stdout(stdout) => interrupt.io(stdout.flush()).await?,
            Sink::Tcp(_) | Sink::Udp { .. } => return Ok(()),
        };
        flushed.map_err(|e| StreamError::io(endpoint, e))
    }

    async fn close(self) -> std::io::Result<()> {
        match self {
            Sink::Tcp(mut stream) => stream.shutdown().await,
            Sink::File(_) | Sink::Stdout(_) | Sink::Udp { .. } => Ok(()),
        }
    }
}

/// How a write loop ended without error.
enum Finish {
    End,
    Kill,
}

pub struct OutputDriver {
    config: EndpointConfig,
    queue: Arc<BoundedQueue>,
    interrupt: Interrupt,
    registration: Registration,
    options: SupervisorOptions,
}

impl OutputDriver {
    pub fn new(
        config: EndpointConfig,
        queue: Arc<BoundedQueue>,
        interrupt: Interrupt,
        registration: Registration,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            config,
            queue,
            interrupt,
            registration,
            options,
        }
    }

    pub async fn run(mut self) {
        let status = if self.options.probe {
            self.probe().await
        } else {
            self.relay().await
        };
        self.queue.detach();
        log::info!("{}: output terminated, {}", self.config.name, status);
        self.registration.complete(status);
    }

    async fn relay(&mut self) -> ExitStatus {
        let mut status = ExitStatus::Clean;
        loop {
            log::info!("{}: writing to {}", self.config.name, self.config.kind);
            match self.cycle().await {
                Ok(Finish::End) => return ExitStatus::Clean,
                Ok(Finish::Kill) => return ExitStatus::Killed,
                Err(StreamError::Cancelled) => {
                    log::debug!("{}: cancelled", self.config.name);
                    return status;
                }
                Err(StreamError::Signal) => return ExitStatus::Killed,
                Err(e) => {
                    log::warn!("{}: {} ({})", self.config.name, e, e.as_label());
                    status = e.exit_status();
                }
            }

            match self.config.retry {
                RetryPolicy::Always => {
                    log::info!(
                        "{}: reopening in {:?}",
                        self.config.name,
                        self.options.retry_delay
                    );
                    match self.interrupt.delay(self.options.retry_delay).await {
                        Ok(()) => {}
                        Err(Interruption::Signal) => return ExitStatus::Killed,
                        Err(Interruption::Cancelled) => return status,
                    }
                }
                RetryPolicy::Never => return status,
                RetryPolicy::IgnoreFailure => {
                    log::info!("{}: failure ignored", self.config.name);
                    return ExitStatus::Clean;
                }
                RetryPolicy::Kill => return ExitStatus::Killed,
            }
        }
    }

    async fn probe(&mut self) -> ExitStatus {
        match self.open().await {
            Ok(sink) => {
                if let Err(e) = sink.close().await {
                    log::debug!("{}: close after probe: {}", self.config.name, e);
                }
                log::info!("{}: reachable ({})", self.config.name, self.config.kind);
                ExitStatus::Clean
            }
            Err(StreamError::Cancelled) => ExitStatus::Clean,
            Err(e) => {
                log::warn!("{}: {}", self.config.name, e);
                e.exit_status()
            }
        }
    }

    async fn cycle(&mut self) -> Result<Finish> {
        let mut sink = self.open().await?;
        let result = match self.drain(&mut sink).await {
            Ok(finish) => sink
                .flush(&self.interrupt, &self.config.name)
                .await
                .map(|()| finish),
            Err(e) => Err(e),
        };
        // every byte has been handed over by now; a failing shutdown changes nothing
        if let Err(e) = sink.close().await {
            log::debug!("{}: close: {}", self.config.name, e);
        }
        result
    }

    async fn drain(&self, sink: &mut Sink) -> Result<Finish> {
        loop {
            match self.interrupt.queue(self.queue.take_next()).await? {
                Chunk::Data(data) => {
                    sink.write(&self.interrupt, &self.config.name, &data).await?
                }
                Chunk::End => {
                    log::debug!("{}: end of stream", self.config.name);
                    return Ok(Finish::End);
                }
                Chunk::Kill => {
                    log::debug!("{}: kill received", self.config.name);
                    return Ok(Finish::Kill);
                }
            }
        }
    }

    async fn open(&self) -> Result<Sink> {
        let name = self.config.name.as_str();
        match &self.config.kind {
            EndpointKind::File { path } => {
                let mut options = tokio::fs::OpenOptions::new();
                options.write(true).create(true);
                // a probe must leave existing content alone
                if !self.options.probe {
                    options.truncate(true);
                }
                let file = self
                    .interrupt
                    .io(options.open(path))
                    .await?
                    .map_err(|e| StreamError::open(name, e))?;
                log::debug!("{}: opened {}", name, path.display());
                Ok(Sink::File(file))
            }
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Tcp,
                keepalive,
            } => {
                let addrs = net::resolve(&self.interrupt, name, host, *port).await?;
                let stream = net::connect(&self.interrupt, name, &addrs).await?;
                if let Err(e) = net::set_keepalive(&stream, *keepalive) {
                    log::warn!("{}: keepalive not applied: {}", name, e);
                }
                log::debug!("{}: connected {}:{}", name, host, port);
                Ok(Sink::Tcp(stream))
            }
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Udp,
                ..
            } => {
                let addrs = net::resolve(&self.interrupt, name, host, *port).await?;
                let dest = addrs[0];
                let socket = net::udp_sender(name, dest).await?;
                log::debug!("{}: sending datagrams to {}", name, dest);
                Ok(Sink::Udp { socket, dest })
            }
            EndpointKind::Std => Ok(Sink::Stdout(tokio::io::stdout())),
        }
    }
}
