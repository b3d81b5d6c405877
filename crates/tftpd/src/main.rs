//! tftpd - Main executable
//!
//! A standalone TFTP server serving read and write requests from a directory.

mod interface;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use argh::FromArgs;
use tftp::{TftpServer, TftpServerConfig, TransferConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 69; // use a port above 1024 for non-root testing

#[derive(FromArgs, Debug)]
#[argh(
    description = "tftpd - TFTP server for reading and writing files over UDP",
    example = "Serve ./boot on the standard port:\n  {command_name} --dir ./boot",
    example = "Non-root testing on a high port:\n  {command_name} --port 6969 --dir /tmp/tftp",
    example = "Listen only on one interface:\n  {command_name} --interface eth0 --dir /srv/tftp"
)]
struct CliConfig {
    #[argh(option, short = 'p', description = "udp port to listen on", default = "DEFAULT_PORT")]
    port: u16,

    #[argh(
        option,
        short = 'a',
        description = "address to listen on",
        default = "IpAddr::from([0, 0, 0, 0])"
    )]
    address: IpAddr,

    #[argh(
        option,
        short = 'I',
        description = "network interface to listen on (overrides --address)"
    )]
    interface: Option<String>,

    #[argh(
        option,
        short = 'd',
        description = "directory to serve; filenames are used as given when omitted"
    )]
    dir: Option<PathBuf>,

    #[argh(
        option,
        description = "seconds to wait for a response before retransmitting",
        default = "1"
    )]
    timeout: u64,

    #[argh(
        option,
        description = "sends of each packet before a transfer is abandoned",
        default = "3"
    )]
    retries: usize,
}

impl CliConfig {
    fn into_server_config(self) -> Result<TftpServerConfig> {
        let ip = match &self.interface {
            Some(name) => IpAddr::V4(
                interface::get_interface_ip(name)
                    .with_context(|| format!("Network interface '{}' has no usable address", name))?,
            ),
            None => self.address,
        };

        if self.timeout == 0 {
            bail!("--timeout must be at least one second");
        }
        if self.retries == 0 {
            bail!("--retries must be at least 1");
        }
        if let Some(dir) = &self.dir
            && !dir.is_dir()
        {
            bail!("Serving directory {} is not a directory", dir.display());
        }

        Ok(TftpServerConfig {
            bind_address: SocketAddr::new(ip, self.port).to_string(),
            root_directory: self.dir,
            transfer_config: TransferConfig {
                timeout: Duration::from_secs(self.timeout),
                max_attempts: self.retries,
                local_bind: (!ip.is_unspecified()).then_some(ip),
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_config: CliConfig = argh::from_env();
    let config = cli_config.into_server_config()?;

    let mut server = TftpServer::new(config);
    server.bind().await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                tracing::error!("TFTP server failed: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
