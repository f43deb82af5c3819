use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use litesession_client::{Engine, EngineConfig};

mod demo;

use demo::DemoOptions;

#[derive(Parser)]
#[command(name = "litesession")]
#[command(version)]
#[command(about = "litesession - interactive examples for the embedded SQL engine")]
struct Cli {
    /// Database file (in-memory when omitted)
    #[arg(long, env = "LITESESSION_DATABASE")]
    database: Option<PathBuf>,

    /// Engine option as KEY=VALUE, may be repeated
    #[arg(short, long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,

    /// Where the basic example writes its CSV export
    #[arg(long, default_value = "test_export.csv")]
    export_path: PathBuf,

    /// CSV field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Keep the CSV export instead of removing it afterwards
    #[arg(long)]
    keep_export: bool,
}

impl Cli {
    fn demo_options(self) -> Result<DemoOptions> {
        if !self.delimiter.is_ascii() || self.delimiter == '\n' {
            bail!("delimiter must be a single ASCII character, got {:?}", self.delimiter);
        }

        let mut config = match &self.database {
            Some(path) => EngineConfig::file(path),
            None => EngineConfig::in_memory(),
        };
        for assignment in &self.config {
            let (name, value) = EngineConfig::parse_assignment(assignment)
                .with_context(|| format!("Invalid --config '{}'", assignment))?;
            config = config.set(name, value);
        }

        Ok(DemoOptions {
            config,
            export_path: self.export_path,
            delimiter: self.delimiter,
            keep_export: self.keep_export,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("litesession=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let options = cli.demo_options()?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    run_menu(&mut stdin.lock(), &mut stdout.lock(), &options)
}

fn run_menu(input: &mut impl BufRead, out: &mut impl Write, options: &DemoOptions) -> Result<()> {
    writeln!(out, "litesession Experimental Examples")?;
    writeln!(out, "=================================")?;
    writeln!(out, "Engine version: {}\n", Engine::version())?;

    loop {
        writeln!(out, "Choose an example to run:")?;
        writeln!(out, "1. Basic Example (In-memory database with simple queries)")?;
        writeln!(out, "q. Quit")?;
        write!(out, "\nEnter your choice: ")?;
        out.flush()?;

        let Some(choice) = read_line(input)? else {
            writeln!(out, "\nExiting...")?;
            return Ok(());
        };

        match choice.trim() {
            "1" => {
                if let Err(e) = demo::run_basic_example(out, options) {
                    eprintln!("Error: {:#}", e);
                }
            }
            "q" | "Q" | "quit" | "exit" => {
                writeln!(out, "Exiting...")?;
                return Ok(());
            }
            _ => writeln!(out, "Invalid choice. Please try again.")?,
        }

        writeln!(out, "\nPress Enter to continue...")?;
        out.flush()?;
        if read_line(input)?.is_none() {
            return Ok(());
        }
        writeln!(out)?;
    }
}

/// Read one line; `None` at end of input
fn read_line(input: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    let read = input.read_line(&mut line).context("Failed to read input")?;
    Ok((read > 0).then_some(line))
}
