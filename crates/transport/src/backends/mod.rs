//! Transport backend implementations.

pub mod rsync;
pub mod scp;

use crate::error::{TransportError, TransportResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Output and exit status of one tool invocation.
pub(crate) struct ToolOutput {
    pub status: Option<i32>,
    pub success: bool,
    /// stdout followed by stderr.
    pub lines: Vec<String>,
}

pub(crate) async fn run_tool(program: &str, args: &[String]) -> TransportResult<ToolOutput> {
    tracing::debug!(program, ?args, "running transport tool");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| TransportError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let lines = String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
        .map(str::to_string)
        .collect();

    Ok(ToolOutput {
        status: output.status.code(),
        success: output.status.success(),
        lines,
    })
}

/// Inputs that do not show up in the tool's per-file report.
pub(crate) fn undelivered(files: &[PathBuf], reported: &[crate::traits::FileReport]) -> Vec<String> {
    files
        .iter()
        .map(|f| base_name(f))
        .filter(|name| !reported.iter().any(|r| r.filename.starts_with(name.as_str())))
        .collect()
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Quote a path for a remote shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
