use anyhow::Result;
use clap::ValueEnum;
use comfy_table::Table;
use serde::Serialize;
use std::io::Write;

use crate::theme::{Tone, paint, palette};

/// How command results are rendered.
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Results that can be rendered as a table or a single line.
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

/// Prints results and status lines according to the global options.
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }
        match self.options.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
            OutputFormat::Table => println!("{}", data.to_table(&self.options)),
            OutputFormat::Compact => println!("{}", data.to_compact()),
        }
        Ok(())
    }

    pub fn success(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.status_line(Tone::Success, message));
        }
    }

    /// Errors print even in quiet mode.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.status_line(Tone::Error, message));
    }

    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.status_line(Tone::Warning, message));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.status_line(Tone::Info, message));
        }
    }

    /// Only shown with `--verbose`, on stderr so it never mixes with JSON output.
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.status_line(Tone::Detail, message));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.options.quiet {
            return;
        }
        if self.colored() {
            println!("\n{}", paint(text, palette::HEADING, true, true));
        } else {
            println!("\n{text}\n{}", "=".repeat(text.chars().count()));
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if !self.options.quiet {
            let key = paint(key, palette::KEY, true, self.colored());
            let value = paint(value, palette::VALUE, false, self.colored());
            println!("{key}: {value}");
        }
    }

    pub fn bullet(&self, text: &str) {
        if !self.options.quiet {
            let icon = paint(Tone::Item.icon(), Tone::Item.color(), false, self.colored());
            println!("  {icon} {text}");
        }
    }

    /// Transient line, overwritten by the next [`clear_line`](Self::clear_line).
    pub fn progress(&self, message: &str) {
        if self.transient_allowed() {
            print!("\r{}...", self.status_line(Tone::Working, message));
            std::io::stdout().flush().ok();
        }
    }

    pub fn clear_line(&self) {
        if self.transient_allowed() {
            print!("\r{}\r", " ".repeat(80));
            std::io::stdout().flush().ok();
        }
    }

    fn colored(&self) -> bool {
        !self.options.no_color
    }

    fn transient_allowed(&self) -> bool {
        !self.options.quiet && self.options.output_format != OutputFormat::Json
    }

    fn status_line(&self, tone: Tone, message: &str) -> String {
        let colored = self.colored();
        format!(
            "{} {}",
            paint(tone.icon(), tone.color(), tone == Tone::Working, colored),
            paint(message, tone.color(), false, colored)
        )
    }
}
