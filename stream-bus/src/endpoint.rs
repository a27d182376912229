use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Which side of the relay an endpoint sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Transport protocol of a socket endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// What a driver does once its I/O loop has exited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Terminate with the recorded status.
    #[default]
    Never,
    /// Wait the retry delay, then reopen the endpoint.
    Always,
    /// Terminate; an output additionally reports a clean status.
    IgnoreFailure,
    /// Terminate as killed. Forced by a termination signal.
    Kill,
}

/// Where the bytes come from or go to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    File {
        path: PathBuf,
    },
    Socket {
        host: String,
        port: u16,
        protocol: Protocol,
        // seconds, 0 = OS default
        keepalive: u32,
    },
    /// stdin for the input, stdout for an output
    Std,
}

/// Configuration of a single endpoint, owned by its driver while running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub direction: Direction,
    pub kind: EndpointKind,
    pub retry: RetryPolicy,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, direction: Direction, kind: EndpointKind) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            retry: RetryPolicy::default(),
        }
    }

    pub fn file(name: impl Into<String>, direction: Direction, path: impl Into<PathBuf>) -> Self {
        Self::new(name, direction, EndpointKind::File { path: path.into() })
    }

    pub fn tcp(name: impl Into<String>, direction: Direction, host: impl Into<String>, port: u16) -> Self {
        Self::socket(name, direction, host, port, Protocol::Tcp)
    }

    pub fn udp(name: impl Into<String>, direction: Direction, host: impl Into<String>, port: u16) -> Self {
        Self::socket(name, direction, host, port, Protocol::Udp)
    }

    pub fn std(name: impl Into<String>, direction: Direction) -> Self {
        Self::new(name, direction, EndpointKind::Std)
    }

    fn socket(
        name: impl Into<String>,
        direction: Direction,
        host: impl Into<String>,
        port: u16,
        protocol: Protocol,
    ) -> Self {
        Self::new(
            name,
            direction,
            EndpointKind::Socket {
                host: host.into(),
                port,
                protocol,
                keepalive: 0,
            },
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the TCP keepalive interval. Ignored for non-socket endpoints.
    pub fn with_keepalive(mut self, secs: u32) -> Self {
        if let EndpointKind::Socket { keepalive, .. } = &mut self.kind {
            *keepalive = secs;
        }
        self
    }
}

impl Display for EndpointKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::File { path } => write!(f, "file://{}", path.display()),
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Tcp,
                ..
            } => write!(f, "tcp://{}:{}", host, port),
            EndpointKind::Socket {
                host,
                port,
                protocol: Protocol::Udp,
                ..
            } => write!(f, "udp://{}:{}", host, port),
            EndpointKind::Std => write!(f, "std://"),
        }
    }
}

impl Display for EndpointConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Final outcome of a driver, written once before it registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExitStatus {
    #[default]
    Clean,
    IoError,
    Killed,
}

impl ExitStatus {
    /// Numeric form: 0 clean, -1 I/O error, -2 killed by a termination signal.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::IoError => -1,
            ExitStatus::Killed => -2,
        }
    }

    pub fn is_clean(self) -> bool {
        self == ExitStatus::Clean
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExitStatus::Clean => "clean",
            ExitStatus::IoError => "io-error",
            ExitStatus::Killed => "killed",
        };
        write!(f, "{} ({})", label, self.code())
    }
}

/// One input fanned out to any number of outputs.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub input: EndpointConfig,
    pub outputs: Vec<EndpointConfig>,
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct StreamConfigBuilder {
    input: Option<EndpointConfig>,
    outputs: Vec<EndpointConfig>,
}

impl StreamConfigBuilder {
    pub fn input(mut self, mut input: EndpointConfig) -> Self {
        input.direction = Direction::Input;
        self.input = Some(input);
        self
    }

    pub fn add_output(mut self, mut output: EndpointConfig) -> Self {
        output.direction = Direction::Output;
        self.outputs.push(output);
        self
    }

    /// Add a file output with the given retry policy
    pub fn add_file_output(
        self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        self.add_output(EndpointConfig::file(name, Direction::Output, path).with_retry(retry))
    }

    pub fn build(self) -> StreamConfig {
        StreamConfig {
            input: self.input.expect("input is required"),
            outputs: self.outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::Clean.code(), 0);
        assert_eq!(ExitStatus::IoError.code(), -1);
        assert_eq!(ExitStatus::Killed.code(), -2);
        assert!(ExitStatus::default().is_clean());
        assert!(!ExitStatus::Killed.is_clean());
    }

    #[test]
    fn test_endpoint_display() {
        let file = EndpointConfig::file("rec", Direction::Output, "/tmp/out.bin");
        assert_eq!(file.to_string(), "rec (file:///tmp/out.bin)");

        let tcp = EndpointConfig::tcp("feed", Direction::Input, "localhost", 9000);
        assert_eq!(tcp.kind.to_string(), "tcp://localhost:9000");

        let udp = EndpointConfig::udp("mirror", Direction::Output, "10.0.0.1", 5000);
        assert_eq!(udp.kind.to_string(), "udp://10.0.0.1:5000");
    }

    #[test]
    fn test_with_keepalive_only_touches_sockets() {
        let tcp = EndpointConfig::tcp("a", Direction::Output, "h", 1).with_keepalive(30);
        match tcp.kind {
            EndpointKind::Socket { keepalive, .. } => assert_eq!(keepalive, 30),
            _ => panic!("Expected Socket endpoint"),
        }

        let std = EndpointConfig::std("b", Direction::Output).with_keepalive(30);
        assert_eq!(std.kind, EndpointKind::Std);
    }

    #[test]
    fn test_builder_forces_directions() {
        let config = StreamConfig::builder()
            .input(EndpointConfig::std("in", Direction::Output))
            .add_output(EndpointConfig::std("out", Direction::Input))
            .add_file_output("copy", "/tmp/copy", RetryPolicy::Always)
            .build();

        assert_eq!(config.input.direction, Direction::Input);
        assert_eq!(config.outputs.len(), 2);
        assert!(config.outputs.iter().all(|o| o.direction == Direction::Output));
        assert_eq!(config.outputs[1].retry, RetryPolicy::Always);
    }

    #[test]
    #[should_panic(expected = "input is required")]
    fn test_builder_missing_input_panics() {
        let _config = StreamConfig::builder()
            .add_output(EndpointConfig::std("out", Direction::Output))
            .build();
    }
}
