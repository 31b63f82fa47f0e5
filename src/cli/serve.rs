use anyhow::{anyhow, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

use naclbox::server::{registry_from_config, Server};

use super::load_config;

#[derive(Args)]
#[command(about = "Serve sandboxed and native pages over HTTP")]
pub struct ServeCommand {
    #[arg(long, help = "Address to listen on (overrides configuration)")]
    bind: Option<String>,

    #[arg(short, long, help = "Port to listen on (overrides configuration)")]
    port: Option<u16>,

    #[arg(short, long, help = "Configuration file to use instead of the default")]
    config: Option<PathBuf>,
}

impl ServeCommand {
    pub fn execute(self) -> Result<()> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }

        let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
            .parse()
            .map_err(|e| {
                anyhow!(
                    "Invalid listen address {}:{}: {}",
                    config.server.bind,
                    config.server.port,
                    e
                )
            })?;

        let registry = registry_from_config(&config).map_err(|e| {
            anyhow!(
                "Could not set up pages: {}\n\n\
                 Suggestions:\n\
                 • Check the image paths under server.images: naclbox config show\n\
                 • Give each image its own base_address if several are configured",
                e
            )
        })?;

        let mut server = Server::bind(addr, registry)?;
        server.serve()?;
        Ok(())
    }
}
