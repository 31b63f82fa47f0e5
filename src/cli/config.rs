//! CLI command for managing naclbox configuration.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use naclbox::config::Config;

#[derive(Args)]
#[command(about = "Manage naclbox configuration")]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write a configuration file with the default settings
    Init {
        /// Overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(&self) -> Result<()> {
        match &self.action {
            ConfigAction::Show => self.show_config(),
            ConfigAction::Path => self.show_path(),
            ConfigAction::Init { force } => self.init_config(*force),
        }
    }

    fn show_config(&self) -> Result<()> {
        let config = Config::load()?;

        if !Config::default_path().is_some_and(|p| p.exists()) {
            println!("{}", style("# No configuration file found, showing defaults").dim());
        }

        let yaml = serde_yaml::to_string(&config)?;
        println!("{}", yaml);

        let layout = config.sandbox.layout()?;
        println!("{}", style("# Derived layout").dim());
        println!(
            "{}",
            style(format!(
                "#   trampoline  {:#x}",
                layout.base_address() + layout.trampoline_offset()
            ))
            .dim()
        );
        println!(
            "{}",
            style(format!(
                "#   stack top   {:#x}",
                layout.base_address() + layout.stack_top_offset()
            ))
            .dim()
        );
        println!(
            "{}",
            style(format!(
                "#   sections below {:#x}",
                layout.base_address() as u64 + layout.placement_limit()
            ))
            .dim()
        );

        Ok(())
    }

    fn show_path(&self) -> Result<()> {
        match Config::default_path() {
            Some(path) => {
                println!("Configuration file path: {}", path.display());
                if path.exists() {
                    println!("Status: File exists");
                } else {
                    println!("Status: File does not exist");
                }
            }
            None => {
                println!("Could not determine configuration directory");
            }
        }

        Ok(())
    }

    fn init_config(&self, force: bool) -> Result<()> {
        let path = Config::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine configuration directory"))?;

        if path.exists() && !force {
            println!("Configuration file already exists at: {}", path.display());
            println!("Use --force to overwrite");
            return Ok(());
        }

        Config::default().save_to(&path)?;

        println!("Created configuration file at: {}", path.display());
        println!();
        println!("Edit the file to add sandboxed pages, then run:");
        println!("  naclbox serve");

        Ok(())
    }
}
