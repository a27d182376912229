// ============================================================================
// Supervisor Tests
// ============================================================================

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use super::{Supervisor, SupervisorOptions};
use crate::endpoint::{Direction, EndpointConfig, ExitStatus, RetryPolicy, StreamConfig};
use crate::registry::DriverId;
use crate::signal::{Signal, SignalBridge};

fn free_tcp_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn free_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn write_input(dir: &Path, len: usize) -> anyhow::Result<(std::path::PathBuf, Vec<u8>)> {
    let path = dir.join("input.bin");
    let content: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    std::fs::write(&path, &content)?;
    Ok((path, content))
}

fn fast_options() -> SupervisorOptions {
    SupervisorOptions::default()
        .with_slots(128)
        .with_slot_size(32)
        .with_retry_delay(Duration::from_millis(50))
}

/// Connect once the input is listening, send `payload`, close.
async fn send_when_listening(port: u16, payload: &'static [u8]) -> anyhow::Result<()> {
    for _ in 0..200 {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(mut stream) => {
                stream.write_all(payload).await?;
                stream.shutdown().await?;
                return Ok(());
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    anyhow::bail!("input never listened on port {}", port)
}

async fn wait_for_len(path: &Path, len: usize) -> anyhow::Result<()> {
    for _ in 0..200 {
        if std::fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0) >= len {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("{} never reached {} bytes", path.display(), len)
}

// ------------------------------------------------------------------------
// File relay
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_fans_out_to_identical_copies() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, content) = write_input(dir.path(), 200)?;
    let first = dir.path().join("first.bin");
    let second = dir.path().join("second.bin");

    let config = StreamConfig::builder()
        .input(EndpointConfig::file("source", Direction::Input, &input))
        .add_file_output("first", &first, RetryPolicy::Never)
        .add_file_output("second", &second, RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let report = Supervisor::new(config, fast_options()).run(&bridge).await;

    assert_eq!(std::fs::read(&first)?, content);
    assert_eq!(std::fs::read(&second)?, content);
    assert_eq!(report.terminations.len(), 3);
    assert!(report.terminations.iter().all(|t| t.status == ExitStatus::Clean));
    assert_eq!(report.exit_code(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_input_fails_run_but_ends_outputs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let config = StreamConfig::builder()
        .input(EndpointConfig::file(
            "source",
            Direction::Input,
            dir.path().join("absent.bin"),
        ))
        .add_file_output("first", dir.path().join("first.bin"), RetryPolicy::Never)
        .add_file_output("second", dir.path().join("second.bin"), RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let report = Supervisor::new(config, fast_options()).run(&bridge).await;

    assert_eq!(report.status_of(DriverId::Input), Some(ExitStatus::IoError));
    assert_eq!(report.output(0).map(|t| t.status), Some(ExitStatus::Clean));
    assert_eq!(report.output(1).map(|t| t.status), Some(ExitStatus::Clean));
    assert_ne!(report.exit_code(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignored_output_failure_spares_siblings() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, content) = write_input(dir.path(), 200)?;
    let good = dir.path().join("good.bin");

    let config = StreamConfig::builder()
        .input(EndpointConfig::file("source", Direction::Input, &input))
        .add_file_output(
            "broken",
            dir.path().join("missing-dir").join("out.bin"),
            RetryPolicy::IgnoreFailure,
        )
        .add_file_output("good", &good, RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let report = Supervisor::new(config, fast_options()).run(&bridge).await;

    assert_eq!(report.output(0).map(|t| t.status), Some(ExitStatus::Clean));
    assert_eq!(std::fs::read(&good)?, content);
    assert_eq!(report.exit_code(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_output_cancels_blocked_input() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let port = free_tcp_port();

    let config = StreamConfig::builder()
        .input(EndpointConfig::tcp("source", Direction::Input, "127.0.0.1", port))
        .add_file_output(
            "broken",
            dir.path().join("missing-dir").join("out.bin"),
            RetryPolicy::Never,
        )
        .build();

    let bridge = SignalBridge::detached();
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Supervisor::new(config, fast_options()).run(&bridge),
    )
    .await?;

    assert_eq!(report.output(0).map(|t| t.status), Some(ExitStatus::IoError));
    assert_eq!(report.status_of(DriverId::Input), Some(ExitStatus::Clean));
    assert_ne!(report.exit_code(), 0);
    Ok(())
}

// ------------------------------------------------------------------------
// Signals
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_signal_while_accepting_kills_every_driver() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let port = free_tcp_port();

    let config = StreamConfig::builder()
        .input(EndpointConfig::tcp("source", Direction::Input, "127.0.0.1", port))
        .add_file_output("first", dir.path().join("first.bin"), RetryPolicy::Always)
        .add_file_output("second", dir.path().join("second.bin"), RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let (report, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            Supervisor::new(config, fast_options()).run(&bridge),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                bridge.deliver(Signal::Interrupt);
            }
        )
    })
    .await?;

    assert_eq!(report.status_of(DriverId::Input), Some(ExitStatus::Killed));
    assert_eq!(report.output(0).map(|t| t.status), Some(ExitStatus::Killed));
    assert_eq!(report.output(1).map(|t| t.status), Some(ExitStatus::Killed));
    assert_ne!(report.exit_code(), 0);
    Ok(())
}

// ------------------------------------------------------------------------
// Reachability test
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_probe_is_repeatable_and_transfers_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, _) = write_input(dir.path(), 200)?;
    let existing = dir.path().join("existing.bin");
    std::fs::write(&existing, b"keep me")?;
    let port = free_tcp_port();

    for _ in 0..2 {
        let config = StreamConfig::builder()
            .input(EndpointConfig::file("source", Direction::Input, &input))
            .add_file_output("existing", &existing, RetryPolicy::Never)
            .add_output(EndpointConfig::udp("mirror", Direction::Output, "127.0.0.1", port))
            .build();

        let bridge = SignalBridge::detached();
        let report = Supervisor::new(config, fast_options().with_probe(true))
            .run(&bridge)
            .await;

        assert!(report.terminations.iter().all(|t| t.status == ExitStatus::Clean));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(std::fs::read(&existing)?, b"keep me");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_probe_reports_unreachable_endpoint() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (input, _) = write_input(dir.path(), 10)?;
    let good = dir.path().join("good.bin");

    let config = StreamConfig::builder()
        .input(EndpointConfig::file("source", Direction::Input, &input))
        .add_file_output(
            "broken",
            dir.path().join("missing-dir").join("out.bin"),
            RetryPolicy::Always,
        )
        .add_file_output("good", &good, RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let report = Supervisor::new(config, fast_options().with_probe(true))
        .run(&bridge)
        .await;

    assert_eq!(report.output(0).map(|t| t.status), Some(ExitStatus::IoError));
    assert_eq!(report.output(1).map(|t| t.status), Some(ExitStatus::Clean));
    assert_eq!(std::fs::read(&good)?.len(), 0);
    assert_ne!(report.exit_code(), 0);
    Ok(())
}

// ------------------------------------------------------------------------
// Sockets
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_input_relays_to_file_and_udp() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let copy = dir.path().join("copy.bin");
    let port = free_tcp_port();
    let receiver = UdpSocket::bind("127.0.0.1:0").await?;
    let udp_port = receiver.local_addr()?.port();

    let config = StreamConfig::builder()
        .input(EndpointConfig::tcp("source", Direction::Input, "127.0.0.1", port).with_keepalive(10))
        .add_file_output("copy", &copy, RetryPolicy::Never)
        .add_output(EndpointConfig::udp("mirror", Direction::Output, "127.0.0.1", udp_port))
        .build();

    let bridge = SignalBridge::detached();
    let (report, sent) = tokio::join!(
        Supervisor::new(config, fast_options()).run(&bridge),
        send_when_listening(port, b"relayed over tcp")
    );
    sent?;

    assert_eq!(std::fs::read(&copy)?, b"relayed over tcp");
    let mut buf = [0u8; 64];
    let n = receiver.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"relayed over tcp");
    assert_eq!(report.exit_code(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_udp_input_ends_on_empty_datagram() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let copy = dir.path().join("copy.bin");
    let port = free_udp_port();

    let config = StreamConfig::builder()
        .input(EndpointConfig::udp("source", Direction::Input, "127.0.0.1", port))
        .add_file_output("copy", &copy, RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let sender = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        socket.send_to(b"first", ("127.0.0.1", port)).await?;
        socket.send_to(b"second", ("127.0.0.1", port)).await?;
        socket.send_to(b"", ("127.0.0.1", port)).await?;
        anyhow::Ok(())
    };
    let (report, sent) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(Supervisor::new(config, fast_options()).run(&bridge), sender)
    })
    .await?;
    sent?;

    assert_eq!(std::fs::read(&copy)?, b"firstsecond");
    assert_eq!(report.exit_code(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retrying_input_keeps_outputs_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let copy = dir.path().join("copy.bin");
    let port = free_tcp_port();

    let config = StreamConfig::builder()
        .input(
            EndpointConfig::tcp("source", Direction::Input, "127.0.0.1", port)
                .with_retry(RetryPolicy::Always),
        )
        .add_file_output("copy", &copy, RetryPolicy::Never)
        .build();

    let bridge = SignalBridge::detached();
    let clients = async {
        send_when_listening(port, b"first;").await?;
        send_when_listening(port, b"second").await?;
        wait_for_len(&copy, 12).await?;
        bridge.deliver(Signal::Terminate);
        anyhow::Ok(())
    };
    let (report, sent) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(Supervisor::new(config, fast_options()).run(&bridge), clients)
    })
    .await?;
    sent?;

    assert_eq!(std::fs::read(&copy)?, b"first;second");
    assert_eq!(report.status_of(DriverId::Input), Some(ExitStatus::Killed));
    assert_eq!(report.output(0).map(|t| t.status), Some(ExitStatus::Killed));
    Ok(())
}
