//! LibreOffice-backed reader and writer
//!
//! Input is first re-saved by a headless `soffice` (which also accepts legacy
//! `.xls`), then read with calamine. Output is written natively and passed
//! through `soffice` once more, so the final file is the office suite's own
//! rendition.
//!
//! Each [`OfficeCodec`] owns one session: a private user profile and a
//! scratch directory, both removed when the codec is dropped. At most one
//! child runs at a time and it is killed if it outlives the timeout or the
//! guard holding it.

use crate::core::dates;
use crate::error::{LedgerError, LedgerResult};
use crate::excel::writer::SheetExporter;
use crate::excel::SpreadsheetBackend;
use crate::matrix::{Matrix, Sheet};
use crate::types::Cell;
use calamine::{open_workbook_auto, Data, Reader};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub const DEFAULT_OFFICE_BINARY: &str = "soffice";
pub const DEFAULT_OFFICE_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How to reach the office suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfficeSettings {
    pub binary: PathBuf,
    pub timeout: Duration,
}

impl Default for OfficeSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_OFFICE_BINARY),
            timeout: DEFAULT_OFFICE_TIMEOUT,
        }
    }
}

/// Scratch space owned by one codec
struct Session {
    profile: TempDir,
    scratch: TempDir,
}

impl Session {
    fn open() -> LedgerResult<Self> {
        let profile = tempfile::Builder::new().prefix("sigef-office-profile-").tempdir()?;
        let scratch = tempfile::Builder::new().prefix("sigef-office-work-").tempdir()?;
        debug!(profile = %profile.path().display(), "office session opened");
        Ok(Self { profile, scratch })
    }

    /// `-env:UserInstallation` wants a file URL
    fn profile_url(&self) -> String {
        let path = self.profile.path().to_string_lossy().replace('\\', "/");
        if path.starts_with('/') {
            format!("file://{}", path)
        } else {
            format!("file:///{}", path)
        }
    }
}

/// Kills the child unless it has already been reaped
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// Poll until exit or `timeout`; the child is killed on timeout
    fn wait_timeout(&mut self, timeout: Duration) -> LedgerResult<std::process::ExitStatus> {
        let started = Instant::now();
        loop {
            let Some(child) = self.child.as_mut() else {
                return Err(LedgerError::Office("office process already reaped".into()));
            };
            if let Some(status) = child.try_wait()? {
                self.child = None;
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                self.kill();
                return Err(LedgerError::Office(format!(
                    "office conversion timed out after {}s",
                    timeout.as_secs()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "office process already gone");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// [`SpreadsheetBackend`] that drives a headless LibreOffice
pub struct OfficeCodec {
    settings: OfficeSettings,
    session: Option<Session>,
}

impl OfficeCodec {
    pub fn new(settings: OfficeSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn session(&mut self) -> LedgerResult<&Session> {
        if self.session.is_none() {
            self.session = Some(Session::open()?);
        }
        self.session
            .as_ref()
            .ok_or_else(|| LedgerError::Office("office session unavailable".into()))
    }

    /// Run one `soffice --convert-to xlsx` of `input` into `out_dir`
    fn convert(&mut self, input: &Path, out_dir: &Path) -> LedgerResult<PathBuf> {
        let timeout = self.settings.timeout;
        let binary = self.settings.binary.clone();
        let profile = self.session()?.profile_url();

        fs::create_dir_all(out_dir)?;
        debug!(binary = %binary.display(), input = %input.display(), "office conversion");
        let child = Command::new(&binary)
            .arg(format!("-env:UserInstallation={}", profile))
            .args(["--headless", "--norestore", "--nolockcheck", "--convert-to", "xlsx"])
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                LedgerError::Office(format!("cannot start {}: {}", binary.display(), e))
            })?;

        let status = ChildGuard::new(child).wait_timeout(timeout)?;
        if !status.success() {
            return Err(LedgerError::Office(format!(
                "{} exited with {}",
                binary.display(),
                status
            )));
        }

        let stem = input
            .file_stem()
            .ok_or_else(|| LedgerError::Office(format!("no file name in {}", input.display())))?;
        let converted = out_dir.join(stem).with_extension("xlsx");
        if !converted.exists() {
            return Err(LedgerError::Office(format!(
                "conversion produced no {}",
                converted.display()
            )));
        }
        Ok(converted)
    }
}

impl SpreadsheetBackend for OfficeCodec {
    fn name(&self) -> &'static str {
        "office"
    }

    fn read_matrix(&mut self, path: &Path) -> LedgerResult<Matrix> {
        let out_dir = self.session()?.scratch.path().join("read");
        let normalized = self.convert(path, &out_dir)?;

        let mut workbook = open_workbook_auto(&normalized)
            .map_err(|e| LedgerError::Import(format!("failed to open {}: {}", normalized.display(), e)))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| LedgerError::Import("workbook has no worksheet".into()))?
            .map_err(|e| LedgerError::Import(e.to_string()))?;

        let (top, left) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows = vec![Vec::new(); top];
        for data_row in range.rows() {
            let mut row = vec![Cell::Empty; left];
            row.extend(data_row.iter().map(data_to_cell));
            rows.push(row);
        }
        let matrix = Matrix::from_rows(rows);
        info!(
            path = %path.display(),
            rows = matrix.len(),
            columns = matrix.width(),
            "read worksheet through office"
        );
        Ok(matrix)
    }

    fn write_matrices(&mut self, path: &Path, sheets: &[Sheet]) -> LedgerResult<()> {
        let scratch = self.session()?.scratch.path().to_path_buf();
        let staged_dir = scratch.join("native");
        fs::create_dir_all(&staged_dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| LedgerError::Office(format!("no file name in {}", path.display())))?;
        let staged = staged_dir.join(file_name);
        SheetExporter::new(sheets).export(&staged)?;

        let converted = self.convert(&staged, &scratch.join("converted"))?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let target = tempfile::Builder::new()
            .prefix(".sigef-")
            .suffix(".xlsx")
            .tempfile_in(dir)?;
        fs::copy(&converted, target.path())?;
        target.persist(path).map_err(|e| LedgerError::Io(e.error))?;
        info!(path = %path.display(), sheets = sheets.len(), "workbook saved through office");
        Ok(())
    }
}

impl Drop for OfficeCodec {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            debug!("office session closed");
        }
    }
}

/// Map a calamine value onto a cell; date-times become dates
pub fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::text(s.as_str()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            match dates::serial_to_date(serial) {
                Some(d) => Cell::Date(d),
                None => {
                    warn!(serial, "date outside range, kept as number");
                    Cell::Number(serial)
                }
            }
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::text(s.as_str()),
        Data::Error(e) => Cell::text(e.to_string()),
    }
}
