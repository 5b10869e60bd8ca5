//! Document conversion using Pandoc.

use crate::error::{ProcessError, ProcessResult};
use crate::tools::{command, run, spill_to_temp};
use tracing::debug;

/// Pandoc reader name for a file extension.
pub fn pandoc_input_format(extension: &str) -> Option<&'static str> {
    match extension.to_lowercase().as_str() {
        "docx" => Some("docx"),
        "odt" => Some("odt"),
        "rtf" => Some("rtf"),
        "epub" => Some("epub"),
        "html" | "htm" => Some("html"),
        _ => None,
    }
}

/// Convert document bytes to GitHub-flavoured Markdown.
pub async fn pandoc_to_markdown(bytes: &[u8], extension: &str) -> ProcessResult<String> {
    let format = pandoc_input_format(extension)
        .ok_or_else(|| ProcessError::UnsupportedFormat(format!(".{} for pandoc", extension)))?;

    let input = spill_to_temp(bytes, extension)?;
    debug!("Converting {:?} with pandoc ({})", input.path(), format);

    let mut cmd = command("pandoc")?;
    cmd.arg(input.path())
        .args(["-f", format])
        .args(["-t", "gfm"])
        .arg("--wrap=none");
    let output = run("pandoc", cmd).await?;

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_formats() {
        assert_eq!(pandoc_input_format("DOCX"), Some("docx"));
        assert_eq!(pandoc_input_format("rtf"), Some("rtf"));
        assert_eq!(pandoc_input_format("doc"), None);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let result = pandoc_to_markdown(b"data", "xyz").await;
        assert!(matches!(result, Err(ProcessError::UnsupportedFormat(_))));
    }
}
