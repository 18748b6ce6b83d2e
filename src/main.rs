use anyhow::Context;
use clap::{Parser, Subcommand};
use sigef_sheets::cli::{self, Backend, RunOptions, StdinPrompt};
use sigef_sheets::core::classifier::DEFAULT_FALLBACK_YEAR;
use sigef_sheets::core::Ledger;
use sigef_sheets::excel::OfficeSettings;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sigef-sheets")]
#[command(about = "Normalize SIGEF ledger exports into clean .xlsx tables")]
#[command(long_about = "SIGEF Sheets - ledger report normalizer

Reads the first worksheet of a SIGEF .xlsx export, runs the fixed cleanup
pipeline for its ledger and writes <name><SUFFIX>.xlsx next to the input.

LEDGERS:
  liquidados  - Liquidated commitments      → _FINAL (two sheets)
  emitidos    - Issued commitments          → _SAIDA (memo/PAD columns)
  pagos       - Paid commitments            → _SAIDA
  a-pagar     - Commitments awaiting payment → _FILTRADO
  retidos     - Withholdings per type       → _FINAL_SEPARADA
  cpf-cnpj    - Creditors with tax id       → _FILTRADO_TIPO

EXAMPLES:
  sigef-sheets run liquidados relatorio.xlsx
  sigef-sheets run emitidos                  # asks for the file
  sigef-sheets run retidos r.xlsx --backend office
  sigef-sheets plan pagos --json")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Transform one ledger report.

The output is written beside the input with the ledger's suffix. When FILE
is omitted the path is read from standard input.

BACKENDS:
  native  - built-in reader and writer (default)
  office  - headless LibreOffice (soffice); any failure falls back to
            native once")]
    /// Transform one ledger report
    Run {
        /// Ledger layout of the input
        #[arg(value_enum)]
        ledger: Ledger,

        /// Path to the .xlsx export (prompted when omitted)
        file: Option<PathBuf>,

        /// Codec used to read and write workbooks
        #[arg(short, long, value_enum, default_value_t = Backend::Native)]
        backend: Backend,

        /// LibreOffice executable for the office backend
        #[arg(long, default_value = "soffice")]
        office_bin: PathBuf,

        /// Seconds before an office conversion is abandoned
        #[arg(long, default_value_t = 120)]
        office_timeout: u64,

        /// Year appended to memo numbers that lack one
        #[arg(long, default_value_t = DEFAULT_FALLBACK_YEAR)]
        default_year: u16,

        /// Show each step and debug logs
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the ordered stage list of a ledger
    Plan {
        #[arg(value_enum)]
        ledger: Ledger,

        /// JSON instead of YAML
        #[arg(long)]
        json: bool,

        /// Year appended to memo numbers that lack one
        #[arg(long, default_value_t = DEFAULT_FALLBACK_YEAR)]
        default_year: u16,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("sigef_sheets={}", level))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            ledger,
            file,
            backend,
            office_bin,
            office_timeout,
            default_year,
            verbose,
        } => {
            init_tracing(verbose);
            let options = RunOptions {
                ledger,
                input: file,
                backend,
                office: OfficeSettings {
                    binary: office_bin,
                    timeout: Duration::from_secs(office_timeout),
                },
                default_year,
                verbose,
            };
            let mut prompt = StdinPrompt::console();
            cli::run(options, &mut prompt)
                .with_context(|| format!("{} run failed", ledger))?;
        }

        Commands::Plan {
            ledger,
            json,
            default_year,
        } => {
            cli::plan(ledger, default_year, json)
                .with_context(|| format!("cannot render the {} plan", ledger))?;
        }
    }

    Ok(())
}
