use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use console::style;
use log::info;
use std::path::PathBuf;

use naclbox::sandbox::{CallOutcome, ReturnContract, SandboxContext};

use super::{load_config, parse_address};

#[derive(Clone, Copy, ValueEnum)]
pub enum Returns {
    /// Sandbox-relative offset of a NUL-terminated string
    String,
    /// 32-bit integer
    Integer,
}

impl From<Returns> for ReturnContract {
    fn from(returns: Returns) -> Self {
        match returns {
            Returns::String => ReturnContract::String,
            Returns::Integer => ReturnContract::Integer,
        }
    }
}

#[derive(Args)]
#[command(about = "Load an image into a sandbox and call its entry point")]
pub struct RunCommand {
    #[arg(help = "Path to a statically linked x86-64 ELF image")]
    image: PathBuf,

    #[arg(long, value_enum, default_value = "string", help = "How to read the entry point's return value")]
    returns: Returns,

    #[arg(short = 'n', long, default_value = "1", help = "Number of times to call the entry point")]
    repeat: usize,

    #[arg(long, value_parser = parse_address, help = "Region base address (overrides configuration)")]
    base: Option<usize>,

    #[arg(short, long, help = "Configuration file to use instead of the default")]
    config: Option<PathBuf>,

    #[arg(long, help = "Print each result as JSON")]
    json: bool,
}

impl RunCommand {
    pub fn execute(self) -> Result<()> {
        if !self.image.exists() {
            return Err(anyhow!(
                "Image not found: {}\n\n\
                 Suggestions:\n\
                 • Check the file path is correct\n\
                 • Generate a test image: naclbox sample fib -o {}",
                self.image.display(),
                self.image.display()
            ));
        }

        let config = load_config(self.config.as_deref())?;
        let base = self.base.unwrap_or(config.sandbox.base_address);
        let layout = config.sandbox.layout_at(base)?;

        let mut context = SandboxContext::create_with_layout(&self.image, layout).map_err(|e| {
            anyhow!(
                "Failed to load {}: {}\n\n\
                 Suggestions:\n\
                 • Inspect the image: naclbox inspect {}\n\
                 • Try a different region base with --base",
                self.image.display(),
                e,
                self.image.display()
            )
        })?;

        let contract = ReturnContract::from(self.returns);
        for call in 1..=self.repeat {
            let outcome = context.call_with(contract)?;
            if self.json {
                println!("{}", serde_json::to_string(&outcome)?);
                continue;
            }
            match outcome {
                CallOutcome::Text(Some(text)) => println!("{}", text),
                CallOutcome::Text(None) => println!("{}", style("(no result)").dim()),
                CallOutcome::Integer(value) => println!("{}", value),
            }
            if self.repeat > 1 {
                info!("Call {}/{} complete", call, self.repeat);
            }
        }

        Ok(())
    }
}
