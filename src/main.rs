use pingpong::config::{parse_size, Config};
use pingpong::error::{Error, Result};
use pingpong::memory::Buffer;
use pingpong::rdma::Connection;
use pingpong::{report, transfer};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(
    version,
    about = "RDMA ping-pong microbenchmark. Runs as the responder without \
             arguments, or connects to PEER as the initiator."
)]
struct Args {
    /// Peer address to connect to (initiator mode). Listens when absent.
    peer: Option<String>,

    /// Port the responder listens on and the initiator connects to.
    #[arg(short, long, default_value_t = 12345)]
    port: u16,

    /// Transfer buffer size in bytes; accepts k/M/G suffixes.
    #[arg(short, long, default_value = "16", value_parser = parse_size)]
    size: usize,

    /// Number of ping-pong rounds.
    #[arg(short, long, default_value_t = 16)]
    rounds: usize,

    /// Spin on the buffer contents as a data-visibility probe before polling
    /// the completion queue. Requires --pattern-fill.
    #[arg(long)]
    busy_poll: bool,

    /// Overwrite the outgoing buffer with a distinct pattern byte each
    /// half-round.
    #[arg(long)]
    pattern_fill: bool,

    /// Shadow transferred data into the device mapping around each
    /// completion. Requires --device.
    #[arg(long)]
    mirror_copy: bool,

    /// Use the device mapping itself as the transfer buffer. Requires
    /// --device.
    #[arg(long)]
    device_buffer: bool,

    /// Memory-mappable device resource for the device modes.
    #[arg(long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Log per-step details.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args: Args = clap::Parser::parse();
    init_tracing(args.verbose);

    let cfg = Config {
        peer: args.peer,
        port: args.port,
        size: args.size,
        rounds: args.rounds,
        busy_poll: args.busy_poll,
        pattern_fill: args.pattern_fill,
        mirror_copy: args.mirror_copy,
        device_buffer: args.device_buffer,
        device: args.device,
    };

    if let Err(err) = run(&cfg) {
        error!("{err}");
        process::exit(err.exit_code());
    }
}

fn run(cfg: &Config) -> Result<()> {
    cfg.validate()?;

    let buffer = match (&cfg.device, cfg.device_buffer) {
        (Some(path), true) => map_device(path, cfg.size)?,
        _ => Buffer::anonymous(cfg.size).map_err(Error::Allocation)?,
    };

    let mirror = match (&cfg.device, cfg.mirror_copy) {
        (Some(path), true) => Some(map_device(path, cfg.size)?),
        _ => None,
    };

    let role = cfg.role();
    info!(?role, size = cfg.size, rounds = cfg.rounds, "starting session");

    let connection = Connection::establish(cfg, buffer)?;
    let log = transfer::run(connection, cfg, mirror)?;

    report::print_summary(&log.summary(cfg.size));
    Ok(())
}

fn map_device(path: &std::path::Path, size: usize) -> Result<Buffer> {
    Buffer::device(path, size).map_err(|source| Error::DeviceMap {
        path: path.to_path_buf(),
        source,
    })
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
