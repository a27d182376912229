//! Configuration file: a YAML sequence of endpoint mappings.
//!
//! ```yaml
//! - Direction: input
//!   Type: socket
//!   Name: 0.0.0.0
//!   Port: 9000
//!   Protocol: TCP
//! - Direction: output
//!   Type: file
//!   Name: /var/lib/netstream/copy.bin
//!   Retry: yes
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use stream_bus::{Direction, EndpointConfig, EndpointKind, Protocol, RetryPolicy, StreamConfig};

pub const MAX_OUTPUTS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionSpec {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeSpec {
    Socket,
    File,
    Std,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrySpec {
    Yes,
    #[default]
    No,
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum ProtocolSpec {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Text(String),
}

impl PortSpec {
    fn number(&self) -> anyhow::Result<u16> {
        match self {
            PortSpec::Number(port) => Ok(*port),
            PortSpec::Text(text) => text
                .trim()
                .parse()
                .with_context(|| format!("invalid port \"{}\"", text)),
        }
    }
}

/// One endpoint as written in the file; every key is optional until validated.
#[derive(Debug, Deserialize)]
pub struct EndpointSpec {
    #[serde(rename = "Direction")]
    pub direction: Option<DirectionSpec>,
    #[serde(rename = "Type")]
    pub kind: Option<TypeSpec>,
    #[serde(rename = "Retry", default)]
    pub retry: RetrySpec,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Port")]
    pub port: Option<PortSpec>,
    #[serde(rename = "Protocol")]
    pub protocol: Option<ProtocolSpec>,
    #[serde(rename = "Keepalive", default)]
    pub keepalive: i64,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

pub fn load(path: &Path) -> anyhow::Result<Vec<EndpointSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not open config file \"{}\"", path.display()))?;
    parse(&text).with_context(|| format!("Error while parsing config file \"{}\"", path.display()))
}

pub fn parse(text: &str) -> anyhow::Result<Vec<EndpointSpec>> {
    let specs: Vec<EndpointSpec> =
        serde_yaml::from_str(text).context("config root must be a sequence of endpoint mappings")?;
    for spec in &specs {
        for key in spec.unknown.keys() {
            log::info!("Unknown key \"{}\"", key);
        }
    }
    Ok(specs)
}

/// Check the parsed endpoints and turn them into the relay configuration.
///
/// The first input found becomes endpoint 0, outputs are numbered from 1 in
/// file order.
pub fn build(specs: Vec<EndpointSpec>) -> anyhow::Result<StreamConfig> {
    let mut input = None;
    let mut outputs = Vec::new();
    for spec in specs {
        if spec.direction == Some(DirectionSpec::Input) && input.is_none() {
            input = Some(spec);
        } else {
            outputs.push(spec);
        }
    }

    let input = input.ok_or_else(|| anyhow!("No input defined"))?;
    if outputs.len() > MAX_OUTPUTS {
        bail!("Defined {} outputs, at most {} allowed", outputs.len(), MAX_OUTPUTS);
    }

    let mut builder = StreamConfig::builder().input(endpoint(input, 0)?);
    for (index, spec) in outputs.into_iter().enumerate() {
        match spec.direction {
            Some(DirectionSpec::Output) => {}
            Some(DirectionSpec::Input) => bail!("More inputs defined"),
            None => bail!("Endpoint {} dir not defined", index + 1),
        }
        builder = builder.add_output(endpoint(spec, index + 1)?);
    }
    Ok(builder.build())
}

fn endpoint(spec: EndpointSpec, num: usize) -> anyhow::Result<EndpointConfig> {
    let undefined = |what: &str| anyhow!("Endpoint {} {} not defined", num, what);

    let direction = match spec.direction.ok_or_else(|| undefined("dir"))? {
        DirectionSpec::Input => Direction::Input,
        DirectionSpec::Output => Direction::Output,
    };
    let kind = match spec.kind.ok_or_else(|| undefined("type"))? {
        TypeSpec::File => EndpointKind::File {
            path: spec.name.ok_or_else(|| undefined("name"))?.into(),
        },
        TypeSpec::Socket => {
            let host = spec.name.ok_or_else(|| undefined("name"))?;
            let port = spec
                .port
                .ok_or_else(|| undefined("port"))?
                .number()
                .with_context(|| format!("Endpoint {}", num))?;
            let protocol = match spec.protocol.ok_or_else(|| undefined("protocol"))? {
                ProtocolSpec::Tcp => Protocol::Tcp,
                ProtocolSpec::Udp => Protocol::Udp,
            };
            let keepalive = u32::try_from(spec.keepalive)
                .map_err(|_| anyhow!("Endpoint {} keepalive {} out of range", num, spec.keepalive))?;
            EndpointKind::Socket {
                host,
                port,
                protocol,
                keepalive,
            }
        }
        TypeSpec::Std => EndpointKind::Std,
    };
    let retry = match spec.retry {
        RetrySpec::Yes => RetryPolicy::Always,
        RetrySpec::No => RetryPolicy::Never,
        RetrySpec::Ignore => RetryPolicy::IgnoreFailure,
    };

    Ok(EndpointConfig::new(format!("endpoint {}", num), direction, kind).with_retry(retry))
}

fn or_dash<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

impl Display for DirectionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectionSpec::Input => write!(f, "input"),
            DirectionSpec::Output => write!(f, "output"),
        }
    }
}

impl Display for TypeSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeSpec::Socket => write!(f, "socket"),
            TypeSpec::File => write!(f, "file"),
            TypeSpec::Std => write!(f, "std"),
        }
    }
}

impl Display for EndpointSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let retry = match self.retry {
            RetrySpec::Yes => "yes",
            RetrySpec::No => "no",
            RetrySpec::Ignore => "ignore",
        };
        let port = self.port.as_ref().map(|port| match port {
            PortSpec::Number(n) => n.to_string(),
            PortSpec::Text(text) => text.clone(),
        });
        let protocol = self.protocol.map(|protocol| match protocol {
            ProtocolSpec::Tcp => "TCP",
            ProtocolSpec::Udp => "UDP",
        });
        writeln!(f, "\tDirection: {}", or_dash(self.direction))?;
        writeln!(f, "\tType: {}", or_dash(self.kind))?;
        writeln!(f, "\tRetry: {}", retry)?;
        writeln!(f, "\tName: {}", or_dash(self.name.as_deref()))?;
        writeln!(f, "\tPort: {}", or_dash(port))?;
        writeln!(f, "\tProtocol: {}", or_dash(protocol))?;
        write!(f, "\tKeepalive: {}", self.keepalive)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
