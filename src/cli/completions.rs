//! Completion scripts for the naclbox command line.

use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{generate, Shell};
use std::io;

use crate::Cli;

#[derive(Args)]
#[command(about = "Print a shell completion script to stdout")]
pub struct CompletionsCommand {
    #[arg(value_enum, help = "Shell the script is written for")]
    shell: ShellType,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ShellType {
    /// Source from ~/.bashrc
    Bash,
    /// Place in a directory on $fpath
    Zsh,
    /// Place in ~/.config/fish/completions
    Fish,
    /// Source from the PowerShell profile
    Powershell,
    /// Source from ~/.config/elvish/rc.elv
    Elvish,
}

impl From<ShellType> for Shell {
    fn from(shell: ShellType) -> Self {
        match shell {
            ShellType::Bash => Shell::Bash,
            ShellType::Zsh => Shell::Zsh,
            ShellType::Fish => Shell::Fish,
            ShellType::Powershell => Shell::PowerShell,
            ShellType::Elvish => Shell::Elvish,
        }
    }
}

impl CompletionsCommand {
    pub fn execute(self) -> Result<()> {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(Shell::from(self.shell), &mut cmd, name, &mut io::stdout());
        Ok(())
    }
}
