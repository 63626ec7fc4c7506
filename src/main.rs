use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context};
use clap::Parser;
use clap_derive::Parser;
use tcpend::config::TcpEndConfig;
use tcpend::receiver::Receiver;
use tcpend::sender::Sender;
use tokio::net::UdpSocket;
use tracing::{error, info, Level};

/// Transfers a single file over UDP with TCP-style reliability. Passing the remote address
///  makes this the sender, otherwise it waits for a sender to connect.
#[derive(Parser)]
struct Args {
    /// local UDP port
    #[clap(short = 'p', long)]
    port: u16,

    /// remote IP address (sender only)
    #[clap(short = 's', long)]
    remote_ip: Option<IpAddr>,

    /// remote UDP port (sender only)
    #[clap(short = 'a', long)]
    remote_port: Option<u16>,

    /// file to send, or to write the received data to
    #[clap(short = 'f', long)]
    file: PathBuf,

    /// maximum transmission unit in bytes, including IP and UDP headers
    #[clap(short = 'm', long)]
    mtu: usize,

    /// sliding window size in segments
    #[clap(short = 'c', long)]
    sws: usize,

    #[clap(long)]
    initial_timeout_ms: Option<u64>,

    #[clap(long)]
    control_timeout_ms: Option<u64>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

impl Args {
    fn config(&self) -> anyhow::Result<Arc<TcpEndConfig>> {
        let mut config = TcpEndConfig::new(self.mtu, self.sws);
        if let Some(millis) = self.initial_timeout_ms {
            config.initial_timeout = Duration::from_millis(millis);
        }
        if let Some(millis) = self.control_timeout_ms {
            config.control_timeout = Duration::from_millis(millis);
        }
        config.validate()?;
        Ok(Arc::new(config))
    }

    fn remote_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match (self.remote_ip, self.remote_port) {
            (Some(ip), Some(port)) => Ok(Some(SocketAddr::new(ip, port))),
            (None, None) => Ok(None),
            _ => bail!("remote IP and remote port must be given together"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.config()?;
    let remote_addr = args.remote_addr()?;

    let local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    let socket = Arc::new(UdpSocket::bind(local_addr).await
        .with_context(|| format!("binding UDP socket to {}", local_addr))?);

    match remote_addr {
        Some(remote_addr) => {
            let file = File::open(&args.file)
                .with_context(|| format!("opening {:?}", args.file))?;

            info!("sending {:?} to {}", args.file, remote_addr);
            let mut sender = Sender::new(config, socket, remote_addr, file)?;
            let stats = sender.run().await?;
            println!("{}", stats);
        }
        None => {
            let file = File::create(&args.file)
                .with_context(|| format!("creating {:?}", args.file))?;

            info!("waiting for a sender on port {} to write {:?}", args.port, args.file);
            let mut receiver = Receiver::new(config, socket, file)?;
            let stats = receiver.run().await?;
            println!("{}", stats);
        }
    }
    Ok(())
}
