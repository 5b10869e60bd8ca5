//! Spawning external tools.

use crate::error::{ProcessError, ProcessResult};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Resolve a tool on `PATH`.
pub fn require_tool(tool: &str) -> ProcessResult<PathBuf> {
    which::which(tool).map_err(|_| ProcessError::ToolNotFound {
        tool: tool.to_string(),
    })
}

/// Build a command for a tool that is killed if its future is dropped.
pub(crate) fn command(tool: &str) -> ProcessResult<Command> {
    let path = require_tool(tool)?;
    let mut cmd = Command::new(path);
    cmd.kill_on_drop(true);
    Ok(cmd)
}

/// Run a command to completion and fail on a non-zero exit status.
pub(crate) async fn run(tool: &str, mut cmd: Command) -> ProcessResult<Output> {
    debug!("Running {}", tool);
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(ProcessError::ProcessFailed {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Write bytes to a temp file whose name ends in `.<extension>`.
///
/// Tools such as tesseract and whisper pick decoders from the extension.
pub(crate) fn spill_to_temp(bytes: &[u8], extension: &str) -> ProcessResult<tempfile::NamedTempFile> {
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let mut file = tempfile::Builder::new().prefix("lore-").suffix(&suffix).tempfile()?;
    std::io::Write::write_all(&mut file, bytes)?;
    std::io::Write::flush(&mut file)?;
    Ok(file)
}

pub(crate) fn ensure_exists(path: &Path) -> ProcessResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ProcessError::FileNotFound(path.to_path_buf()))
    }
}
