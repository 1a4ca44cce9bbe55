//! Clinicload CLI - import health-registry files
//!
//! # Main Commands
//!
//! ```bash
//! clinicload serve                                  # Start HTTP server (port 3000)
//! clinicload materialize patients.xlsx -d patient   # Build entities from a local file
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! clinicload parse adt.hl7                          # Print Field Records as JSON lines
//! clinicload column 703                             # Column label codec (703 -> AAA)
//! ```

use clap::{Parser, Subcommand};
use clinicload::{
    column_index, column_label, logging, pipeline, server, DataType, FileFormat, Settings,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "clinicload")]
#[command(about = "Import spreadsheets, XML and clinical messages into registry entities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server, dispatch queue and workers
    Serve {
        /// Port to listen on (default: CLINICLOAD_PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Parse a file and print its Field Records as JSON lines
    Parse {
        /// Input file
        input: PathBuf,

        /// File format (guessed from the extension if not specified)
        #[arg(short, long)]
        format: Option<FileFormat>,
    },

    /// Parse and materialize a file, printing entities and line errors
    Materialize {
        /// Input file
        input: PathBuf,

        /// File format (guessed from the extension if not specified)
        #[arg(short, long)]
        format: Option<FileFormat>,

        /// Data type the file contains
        #[arg(short, long)]
        data_type: DataType,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a column number to its label, or a label to its number
    Column {
        /// Column number (`27`) or label (`AA`)
        value: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match Settings::from_env() {
        Ok(settings) => match cli.command {
            Commands::Serve { port } => cmd_serve(settings, port).await,
            Commands::Parse { input, format } => cmd_parse(&input, format, &settings),
            Commands::Materialize {
                input,
                format,
                data_type,
                output,
            } => cmd_materialize(&input, format, data_type, output.as_deref(), &settings),
            Commands::Column { value } => cmd_column(&value),
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_serve(mut settings: Settings, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    if let Some(port) = port {
        settings.port = port;
    }
    server::start_server(settings).await
}

fn resolve_format(input: &Path, format: Option<FileFormat>) -> Result<FileFormat, Box<dyn std::error::Error>> {
    format
        .or_else(|| FileFormat::from_file_name(&input.to_string_lossy()))
        .ok_or_else(|| format!("cannot guess format of {}, use --format", input.display()).into())
}

fn cmd_parse(
    input: &Path,
    format: Option<FileFormat>,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = resolve_format(input, format)?;
    eprintln!("📄 Parsing {} as {}", input.display(), format);

    let records = pipeline::parse_file(input, format, settings)?;
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    eprintln!("✅ {} field records", records.len());
    Ok(())
}

fn cmd_materialize(
    input: &Path,
    format: Option<FileFormat>,
    data_type: DataType,
    output: Option<&Path>,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = resolve_format(input, format)?;
    eprintln!("📄 Materializing {} ({}, {})", input.display(), format, data_type);

    let run = pipeline::process_file(input, format, data_type, settings)?;

    eprintln!("   Entities:    {}", run.entities.len());
    eprintln!("   Line errors: {}", run.line_errors.len());
    for err in run.line_errors.iter().take(5) {
        eprintln!("     - {}", err);
    }

    let json = serde_json::to_string_pretty(&run)?;
    write_output(&json, output)?;
    Ok(())
}

fn cmd_column(value: &str) -> Result<(), Box<dyn std::error::Error>> {
    match value.parse::<u32>() {
        Ok(0) => Err("column numbers start at 1".into()),
        Ok(n) => {
            println!("{}", column_label(n));
            Ok(())
        }
        Err(_) => {
            let index = column_index(value).ok_or_else(|| format!("invalid column label: {}", value))?;
            println!("{}", index);
            Ok(())
        }
    }
}

fn write_output(content: &str, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            fs::write(path, content)?;
            eprintln!("   💾 Saved to: {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
