//! External tool invocation.

use tokio::process::Command;

use crate::error::{XlxcError, XlxcResult};

/// Run a command to completion, returning its stdout.
///
/// # Errors
///
/// Returns [`XlxcError::HostOperation`] if the program cannot be started
/// or exits unsuccessfully, carrying its stderr.
pub async fn run(program: &str, args: &[&str]) -> XlxcResult<String> {
    tracing::debug!(program, ?args, "Running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| XlxcError::host(program, format!("failed to execute: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(XlxcError::host(
            format!("{program} {}", args.join(" ")),
            format!("{}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        assert_eq!(run("sh", &["-c", "echo xia"]).await.unwrap(), "xia\n");
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let err = run("sh", &["-c", "echo busy >&2; exit 3"]).await.unwrap_err();
        assert!(matches!(err, XlxcError::HostOperation { .. }));
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn missing_program_is_a_host_error() {
        let err = run("xlxc-no-such-tool", &[]).await.unwrap_err();
        assert!(err.to_string().contains("failed to execute"));
    }
}
