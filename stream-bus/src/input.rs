//! Input driver: reads the single source and fans each chunk out to every
//! output queue.
//!
//! One cycle is `open → read loop → {eof, i/o error, signal}`. What follows a
//! cycle is decided by the endpoint's [`RetryPolicy`]: `Always` sleeps the
//! retry delay and opens the source again, anything else dispatches the final
//! sentinel (END, or KILL after a termination signal) and reports.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::endpoint::{EndpointConfig, EndpointKind, ExitStatus, Protocol, RetryPolicy};
use crate::error::{Result, StreamError};
use crate::net;
use crate::queue::{BoundedQueue, Chunk, QueueError};
use crate::registry::Registration;
use crate::signal::{Interrupt, Interruption};
use crate::supervisor::SupervisorOptions;

enum Source {
    File(tokio::fs::File),
    Tcp(TcpStream),
    Udp(UdpSocket),
    Stdin(tokio::io::Stdin),
}

impl Source {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::File(file) => file.read(buf).await,
            Source::Tcp(stream) => stream.read(buf).await,
            Source::Udp(socket) => socket.recv(buf).await,
            Source::Stdin(stdin) => stdin.read(buf).await,
        }
    }

    fn is_datagram(&self) -> bool {
        matches!(self, Source::Udp(_))
    }
}

pub struct InputDriver {
    config: EndpointConfig,
    queues: Vec<Arc<BoundedQueue>>,
    interrupt: Interrupt,
    registration: Registration,
    options: SupervisorOptions,
    // bound once, accepted from on every cycle
    listener: Option<TcpListener>,
}

impl InputDriver {
    pub fn new(
        config: EndpointConfig,
        queues: Vec<Arc<BoundedQueue>>,
        interrupt: Interrupt,
        registration: Registration,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            config,
            queues,
            interrupt,
            registration,
            options,
            listener: None,
        }
    }

    pub async fn run(mut self) {
        let status = if self.options.probe {
            self.probe().await
        } else {
            self.relay().await
        };
        log::info!("{}: input terminated, {}", self.config.name, status);
        self.registration.complete(status);
    }

    async fn relay(&mut self) -> ExitStatus {
        let mut status = ExitStatus::Clean;
        loop {
            log::info!("{}: reading from {}", self.config.name, self.config.kind);
            match self.cycle().await {
                Ok(()) => {
                    log::debug!("{}: end of source", self.config.name);
                    status = ExitStatus::Clean;
                }
                Err(StreamError::Cancelled) => {
                    log::debug!("{}: cancelled", self.config.name);
                    return status;
                }
                Err(StreamError::Signal) => return self.kill(),
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
                        Ok(()) => continue,
                        Err(Interruption::Signal) => return self.kill(),
                        Err(Interruption::Cancelled) => return status,
                    }
                }
                RetryPolicy::Never | RetryPolicy::IgnoreFailure => {
                    self.dispatch(Chunk::End);
                    return status;
                }
                RetryPolicy::Kill => return self.kill(),
            }
        }
    }

    fn kill(&mut self) -> ExitStatus {
        self.config.retry = RetryPolicy::Kill;
        self.dispatch(Chunk::Kill);
        ExitStatus::Killed
    }

    /// Open the source without reading from it.
    async fn probe(&mut self) -> ExitStatus {
        let result = match self.config.kind.clone() {
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Tcp,
                ..
            } => self.listen(&host, port).await.map(|_| ()),
            _ => self.open().await.map(drop),
        };
        match result {
            Ok(()) => {
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

    async fn cycle(&mut self) -> Result<()> {
        let mut source = self.open().await?;
        self.pump(&mut source).await
    }

    async fn open(&mut self) -> Result<Source> {
        let name = self.config.name.clone();
        match self.config.kind.clone() {
            EndpointKind::File { path } => {
                let file = self
                    .interrupt
                    .io(tokio::fs::File::open(&path))
                    .await?
                    .map_err(|e| StreamError::open(&name, e))?;
                log::debug!("{}: opened {}", name, path.display());
                Ok(Source::File(file))
            }
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Tcp,
                keepalive,
            } => {
                let listener = self.listen(&host, port).await?;
                let accepted = self.interrupt.io(listener.accept()).await;
                self.listener = Some(listener);
                let (stream, peer) = accepted?.map_err(|e| StreamError::open(&name, e))?;
                log::debug!("{}: accepted {}", name, peer);
                if let Err(e) = net::set_keepalive(&stream, keepalive) {
                    log::warn!("{}: keepalive not applied: {}", name, e);
                }
                Ok(Source::Tcp(stream))
            }
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Udp,
                ..
            } => {
                let addrs = net::resolve(&self.interrupt, &name, &host, port).await?;
                let socket = net::bind_udp(&name, &addrs).await?;
                log::debug!("{}: bound udp {}:{}", name, host, port);
                Ok(Source::Udp(socket))
            }
            EndpointKind::Std => Ok(Source::Stdin(tokio::io::stdin())),
        }
    }

    /// Take the listener out of `self`; the caller puts it back.
    async fn listen(&mut self, host: &str, port: u16) -> Result<TcpListener> {
        if let Some(listener) = self.listener.take() {
            return Ok(listener);
        }
        let addrs = net::resolve(&self.interrupt, &self.config.name, host, port).await?;
        let listener = net::listen(&self.config.name, &addrs)?;
        log::debug!("{}: listening on {}:{}", self.config.name, host, port);
        Ok(listener)
    }

    async fn pump(&self, source: &mut Source) -> Result<()> {
        let mut buf = vec![0u8; self.options.slot_size];
        loop {
            if source.is_datagram() {
                let n = self
                    .interrupt
                    .io(source.read(&mut buf))
                    .await?
                    .map_err(|e| StreamError::io(&self.config.name, e))?;
                if n == 0 {
                    return Ok(());
                }
                self.forward(&buf[..n]);
                continue;
            }

            let mut filled = 0;
            while filled < buf.len() {
                match self.interrupt.io(source.read(&mut buf[filled..])).await? {
                    Ok(0) => {
                        self.forward(&buf[..filled]);
                        return Ok(());
                    }
                    Ok(n) => filled += n,
                    Err(e) => {
                        self.forward(&buf[..filled]);
                        return Err(StreamError::io(&self.config.name, e));
                    }
                }
            }
            self.forward(&buf);
        }
    }

    fn forward(&self, data: &[u8]) {
        if !data.is_empty() {
            self.dispatch(Chunk::Data(Bytes::copy_from_slice(data)));
        }
    }

    /// Insert into every queue. A full queue loses this chunk only.
    fn dispatch(&self, chunk: Chunk) {
        for queue in &self.queues {
            match queue.insert(chunk.clone()) {
                Ok(()) | Err(QueueError::Detached { .. }) => {}
                Err(e @ QueueError::Overflow { .. }) => {
                    log::warn!("{}: {}", self.config.name, e)
                }
                Err(e) => log::debug!("{}: {}", self.config.name, e),
            }
        }
    }
}
