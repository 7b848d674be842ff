use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cancel::ensure_live;
use super::external::ToolRunner;
use super::traits::{ConversionError, Converter};
use crate::formats::{OFFICE_SUITE, normalize_extension};

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| normalize_extension(&ext.to_string_lossy()))
        .unwrap_or_default()
}

fn office_suite_handles(input: &str, output: &str) -> bool {
    let output = output.trim_start_matches('.');
    OFFICE_SUITE
        .iter()
        .any(|(src, targets)| *src == input && targets.contains(&output))
}

/// Office documents and markup, via external converters
#[derive(Debug, Clone)]
pub struct DocumentHandler {
    tools: ToolRunner,
    office_suite: String,
    markup: String,
}

impl DocumentHandler {
    pub fn new(
        tools: ToolRunner,
        office_suite: impl Into<String>,
        markup: impl Into<String>,
    ) -> Self {
        Self {
            tools,
            office_suite: office_suite.into(),
            markup: markup.into(),
        }
    }

    /// The office suite names its output `<input stem>.<ext>` inside an output
    /// directory, so it writes into a scratch directory next to `output` and
    /// the result is renamed into place.
    async fn run_office_suite(
        &self,
        input: &Path,
        output: &Path,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let scratch = tempfile::Builder::new()
            .prefix(".office-")
            .tempdir_in(parent)?;

        self.tools
            .run(
                &self.office_suite,
                [
                    OsStr::new("--headless"),
                    OsStr::new("--convert-to"),
                    OsStr::new(target),
                    OsStr::new("--outdir"),
                    scratch.path().as_os_str(),
                    input.as_os_str(),
                ],
                cancel,
            )
            .await?;

        let stem = input.file_stem().unwrap_or_default();
        let mut produced_name = stem.to_os_string();
        produced_name.push(".");
        produced_name.push(target);
        let produced = scratch.path().join(produced_name);

        if !tokio::fs::try_exists(&produced).await? {
            return Err(ConversionError::ExternalToolFailed {
                tool: self.office_suite.clone(),
                reason: format!("expected output {} was not produced", produced.display()),
            });
        }

        ensure_live(cancel)?;
        tokio::fs::rename(&produced, output).await?;
        Ok(())
    }

    async fn run_markup(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        self.tools
            .run(
                &self.markup,
                [input.as_os_str(), OsStr::new("-o"), output.as_os_str()],
                cancel,
            )
            .await
    }
}

#[async_trait]
impl Converter for DocumentHandler {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        let source = extension_of(input);
        let target = extension_of(output);

        if office_suite_handles(&source, &target) {
            debug!(%source, %target, "Converting with office suite");
            self.run_office_suite(input, output, target.trim_start_matches('.'), cancel)
                .await
        } else {
            debug!(%source, %target, "Converting with markup converter");
            self.run_markup(input, output, cancel).await
        }
    }

    fn name(&self) -> &'static str {
        "document"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_office_suite_selection() {
        assert!(office_suite_handles(".docx", ".pdf"));
        assert!(office_suite_handles(".csv", "xlsx"));
        assert!(!office_suite_handles(".md", ".html"));
        assert!(!office_suite_handles(".txt", ".pdf"));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/x/Report.DOCX")), ".docx");
        assert_eq!(extension_of(Path::new("noext")), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_office_suite_output_must_exist() {
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("doc.odt");
        let output = dir.path().join("doc.pdf");
        std::fs::write(&input, b"odt").unwrap();

        // `true` accepts any arguments and produces nothing
        let handler = DocumentHandler::new(ToolRunner::new(Duration::from_secs(5)), "true", "true");
        let err = handler
            .convert(&input, &output, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::ExternalToolFailed { .. }));
        assert!(!output.exists());
    }
}
