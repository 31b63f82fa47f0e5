//! A minimal page server: each request names a page, each page is produced by
//! a native library or a sandboxed image.
//!
//! Connections are handled one at a time on the calling thread. Sandbox
//! contexts are not `Send`, so the whole server stays on the thread that
//! loaded them.

pub mod pages;
pub mod request;

use log::{info, warn};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

pub use pages::{NativeLibrary, PageRegistry, LIBRARY_ENTRY};
pub use request::{resource_name, Response};

use crate::config::Config;
use crate::error::Result;
use crate::sandbox::SandboxContext;

/// Largest request the server reads; anything beyond it is ignored.
pub const MAX_REQUEST_LEN: usize = 1024;

/// Builds the page registry described by `config`: every library in the
/// library directory plus every configured sandbox image.
pub fn registry_from_config(config: &Config) -> Result<PageRegistry> {
    let mut registry = PageRegistry::new();

    let libraries = registry.load_library_dir(&config.server.library_dir)?;
    info!(
        "Loaded {} native page(s) from {}",
        libraries,
        config.server.library_dir.display()
    );

    for image in &config.server.images {
        let base = image.base_address.unwrap_or(config.sandbox.base_address);
        let layout = config.sandbox.layout_at(base)?;
        let context = SandboxContext::create_with_layout(&image.path, layout)?;
        info!("Created sandbox '{}' at {:#x}", image.name, base);
        registry.add_sandbox(image.name.clone(), context);
    }

    if config.server.verify_on_start {
        verify_sandboxes(&mut registry);
    }

    Ok(registry)
}

/// Calls every sandbox once and logs what it returns.
pub fn verify_sandboxes(registry: &mut PageRegistry) {
    for (name, context) in registry.sandboxes_mut() {
        match context.call() {
            Ok(Some(output)) => info!("Sandbox '{}' output: {}", name, output),
            Ok(None) => warn!("Sandbox '{}' returned no result", name),
            Err(e) => warn!("Sandbox '{}' failed verification: {}", name, e),
        }
    }
}

pub struct Server {
    listener: TcpListener,
    registry: PageRegistry,
}

impl Server {
    pub fn bind(addr: impl Into<SocketAddr>, registry: PageRegistry) -> Result<Self> {
        let listener = TcpListener::bind(addr.into())?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &PageRegistry {
        &self.registry
    }

    /// Accepts and answers connections until accepting fails.
    pub fn serve(&mut self) -> Result<()> {
        info!("Serving {} page(s) on {}", self.registry.len(), self.local_addr()?);
        loop {
            self.serve_one()?;
        }
    }

    /// Accepts a single connection and answers it.
    pub fn serve_one(&mut self) -> Result<()> {
        let (stream, peer) = self.listener.accept()?;
        if let Err(e) = self.handle(stream, peer) {
            warn!("Connection from {} failed: {}", peer, e);
        }
        Ok(())
    }

    fn handle(&mut self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let mut buffer = [0u8; MAX_REQUEST_LEN];
        let read = stream.read(&mut buffer)?;
        let request = String::from_utf8_lossy(&buffer[..read]);
        let resource = resource_name(&request);

        let response = self.registry.respond(&resource);
        info!("{} /{} -> {}", peer, resource, response.status());

        stream.write_all(&response.to_bytes())?;
        Ok(())
    }
}
