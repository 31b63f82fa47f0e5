use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use std::path::PathBuf;

use naclbox::image::samples;

#[derive(Clone, Copy, ValueEnum)]
pub enum SampleKind {
    /// Returns the decimal Fibonacci number as a string
    Fib,
    /// Returns a fixed string
    Text,
    /// Returns no result
    Null,
    /// Returns an integer
    Integer,
}

#[derive(Args)]
#[command(about = "Write a small sandbox-ready ELF image")]
pub struct SampleCommand {
    #[arg(value_enum)]
    kind: SampleKind,

    #[arg(short, long, help = "Output path")]
    output: PathBuf,

    #[arg(long, default_value = "20", help = "Fibonacci index for the fib sample")]
    index: u32,

    #[arg(long, default_value = "hello", help = "String returned by the text sample")]
    text: String,

    #[arg(long, default_value = "42", allow_hyphen_values = true, help = "Value returned by the integer sample")]
    value: i32,
}

impl SampleCommand {
    pub fn execute(self) -> Result<()> {
        let (image, returns) = match self.kind {
            SampleKind::Fib => (samples::fib_image(self.index), "string"),
            SampleKind::Text => (samples::text_image(&self.text), "string"),
            SampleKind::Null => (samples::null_image(), "string"),
            SampleKind::Integer => (samples::integer_image(self.value), "integer"),
        };

        image.write_to(&self.output)?;

        println!(
            "{} Wrote {}",
            style("✓").green(),
            style(self.output.display()).bold()
        );
        println!(
            "  Run it with: naclbox run {} --returns {}",
            self.output.display(),
            returns
        );
        Ok(())
    }
}
