use crate::core::classifier::DEFAULT_FALLBACK_YEAR;
use crate::core::Ledger;
use crate::error::{LedgerError, LedgerResult};
use crate::excel::{NativeCodec, OfficeCodec, OfficeSettings, SpreadsheetBackend};
use crate::matrix::Sheet;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which codec reads the input and writes the output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Built-in zip/XML reader and rust_xlsxwriter output
    #[default]
    Native,
    /// Headless LibreOffice, falling back to native on failure
    Office,
}

/// Everything `run` needs, gathered from the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub ledger: Ledger,
    pub input: Option<PathBuf>,
    pub backend: Backend,
    pub office: OfficeSettings,
    pub default_year: u16,
    pub verbose: bool,
}

impl RunOptions {
    pub fn new(ledger: Ledger, input: Option<PathBuf>) -> Self {
        Self {
            ledger,
            input,
            backend: Backend::Native,
            office: OfficeSettings::default(),
            default_year: DEFAULT_FALLBACK_YEAR,
            verbose: false,
        }
    }
}

/// What a run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub output: PathBuf,
    pub backend: &'static str,
    /// Worksheet name and row count, header included
    pub sheets: Vec<(String, usize)>,
}

/// Asks for an input path when none was given
pub trait PathPrompt {
    fn ask(&mut self, ledger: Ledger) -> LedgerResult<Option<PathBuf>>;
}

/// Reads the path from a line of input
pub struct StdinPrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> StdinPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl StdinPrompt<io::StdinLock<'static>, io::Stderr> {
    pub fn console() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> PathPrompt for StdinPrompt<R, W> {
    fn ask(&mut self, ledger: Ledger) -> LedgerResult<Option<PathBuf>> {
        write!(
            self.output,
            "{} ",
            format!("📂 Path to the {} report (.xlsx):", ledger).cyan()
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        // Paths dragged into a terminal often arrive quoted
        let answer = line.trim().trim_matches(|c| c == '"' || c == '\'');
        if answer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(answer)))
        }
    }
}

/// Execute the run command
pub fn run(options: RunOptions, prompt: &mut dyn PathPrompt) -> LedgerResult<RunReport> {
    println!(
        "{}",
        format!("📒 SIGEF Sheets - {}", options.ledger).bold().green()
    );

    let input = match options.input.clone() {
        Some(path) => path,
        None => prompt.ask(options.ledger)?.ok_or(LedgerError::NoInput)?,
    };
    if !input.is_file() {
        return Err(LedgerError::InputNotFound(input));
    }
    let output = options.ledger.output_path(&input);

    println!("   Input:   {}", input.display());
    println!("   Output:  {}", output.display());
    println!("   Backend: {}\n", backend_label(options.backend).cyan());

    let report = match options.backend {
        Backend::Native => process(&options, &mut NativeCodec, &input, &output)?,
        Backend::Office => {
            let mut office = OfficeCodec::new(options.office.clone());
            match process(&options, &mut office, &input, &output) {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "office backend failed, falling back to native");
                    println!(
                        "{}",
                        format!("⚠️  Office backend failed ({}); using native codec", e).yellow()
                    );
                    drop(office);
                    process(&options, &mut NativeCodec, &input, &output)?
                }
            }
        }
    };

    println!("{}", "✅ Done!".bold().green());
    for (name, rows) in &report.sheets {
        println!(
            "   📄 {} ({} rows)",
            name.bright_blue().bold(),
            rows.saturating_sub(1)
        );
    }
    println!("   Saved: {}\n", report.output.display());

    Ok(report)
}

/// Read, transform and write one file with the given backend
pub fn process(
    options: &RunOptions,
    backend: &mut dyn SpreadsheetBackend,
    input: &Path,
    output: &Path,
) -> LedgerResult<RunReport> {
    if options.verbose {
        println!("{}", format!("📖 Reading with {} codec...", backend.name()).cyan());
    }
    let matrix = backend.read_matrix(input)?;
    if options.verbose {
        println!(
            "   {} rows × {} columns\n",
            matrix.len(),
            matrix.width()
        );
    }

    let pipeline = options.ledger.pipeline(options.default_year);
    if options.verbose {
        println!(
            "{}",
            format!("🧮 Running {} stages...", pipeline.stages.len()).cyan()
        );
    }
    let sheets: Vec<Sheet> = pipeline.run(matrix);

    if options.verbose {
        println!("{}", "💾 Writing workbook...".cyan());
    }
    backend.write_matrices(output, &sheets)?;
    info!(
        ledger = %options.ledger,
        backend = backend.name(),
        output = %output.display(),
        "run complete"
    );

    Ok(RunReport {
        output: output.to_path_buf(),
        backend: backend.name(),
        sheets: sheets
            .iter()
            .map(|s| (s.name.clone(), s.matrix.len()))
            .collect(),
    })
}

/// Execute the plan command: print the ordered stage list
pub fn plan(ledger: Ledger, default_year: u16, json: bool) -> LedgerResult<()> {
    let pipeline = ledger.pipeline(default_year);
    let rendered = if json {
        serde_json::to_string_pretty(&pipeline)?
    } else {
        serde_yaml::to_string(&pipeline)?
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn backend_label(backend: Backend) -> &'static str {
    match backend {
        Backend::Native => "native",
        Backend::Office => "office",
    }
}
