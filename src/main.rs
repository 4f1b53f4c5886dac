use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commitwire::config::{Config, CoordinatorConfig, ParticipantConfig};
use commitwire::coordinator::Coordinator;
use commitwire::error::{Error, Result};
use commitwire::participant::{Participant, RotatingDissent};
use commitwire::transport::{Transport, TransportKind};

/// Two-phase-commit coordination engine. Run one coordinator with
/// `--server N` and N participants with `--client ADDR --id I`.
#[derive(Parser, Debug)]
#[command(name = "commitwire", version, about)]
struct Cli {
    /// Run as coordinator for this many participants
    #[arg(short = 's', long = "server", value_name = "COUNT")]
    server: Option<usize>,

    /// Worker threads collecting responses (coordinator only)
    #[arg(short = 'T', long, default_value_t = 1)]
    threads: usize,

    /// Run as participant, connecting to this coordinator address
    #[arg(short = 'c', long = "client", value_name = "ADDR")]
    client: Option<IpAddr>,

    /// Participant id, 1-based (participant only)
    #[arg(short = 'C', long, default_value_t = 1)]
    id: i16,

    /// Transport: tcp, udp or rudp
    #[arg(short = 't', long, default_value = "tcp")]
    transport: TransportKind,

    /// Protocol port; datagram transports also use port+id per participant
    #[arg(short = 'p', long, default_value_t = commitwire::config::DEFAULT_PORT)]
    port: u16,

    /// On-wire message size in bytes (padded, floor 16)
    #[arg(short = 'm', long, default_value_t = commitwire::config::DEFAULT_MSG_SIZE)]
    message_size: usize,

    /// Per-phase response timeout in milliseconds
    #[arg(short = 'w', long, default_value_t = 2000)]
    wait: u64,

    /// Retransmission timeout in milliseconds (rudp only)
    #[arg(short = 'r', long, default_value_t = 200)]
    rto: u64,

    /// Throughput report interval, in rounds
    #[arg(short = 'i', long, default_value_t = commitwire::config::DEFAULT_REPORT_INTERVAL)]
    report_interval: u64,

    /// Per-worker statistics buffer length, in samples
    #[arg(short = 'l', long, default_value_t = commitwire::config::DEFAULT_STATS_LEN)]
    stats_len: usize,

    /// Stop after this many rounds (default: run until a fatal error)
    #[arg(long)]
    rounds: Option<u64>,

    /// Where the coordinator writes its latency report
    #[arg(long, default_value = "/tmp/commitwire.stats")]
    stats_file: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let base = Config {
        port: cli.port,
        msg_size: cli.message_size,
        rto: Duration::from_millis(cli.rto),
        round_timeout: Duration::from_millis(cli.wait),
        stats_len: cli.stats_len,
        report_interval: cli.report_interval,
        retry_cap: commitwire::config::DEFAULT_RETRY_CAP,
    };
    let transport = Transport::new(cli.transport, base.effective_msg_size(), base.rto);

    match (cli.server, cli.client) {
        (Some(participants), None) => {
            let cfg = CoordinatorConfig {
                base,
                participants,
                workers: cli.threads,
                bind: IpAddr::from([0, 0, 0, 0]),
                rounds: cli.rounds,
                stats_path: cli.stats_file,
            };
            let mut coordinator = Coordinator::new(cfg, &transport)?;
            let outcome = coordinator.run();
            let report = coordinator.shutdown();
            outcome?;
            report?;
            Ok(())
        }
        (None, Some(server)) => {
            let cfg = ParticipantConfig {
                base,
                id: cli.id,
                server,
            };
            let policy = RotatingDissent::new(cli.id);
            let mut participant = Participant::connect(cfg, &transport, policy)?;
            participant.run(cli.rounds)
        }
        _ => Err(Error::Config(
            "pick exactly one of --server COUNT or --client ADDR".into(),
        )),
    }
}
