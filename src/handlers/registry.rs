use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::archive::ArchiveHandler;
use super::data::DataHandler;
use super::document::DocumentHandler;
use super::external::ToolRunner;
use super::image::ImageHandler;
use super::media::MediaHandler;
use super::traits::{ConversionError, Converter};
use super::types::{ConversionJob, DispatchReport};
use crate::config::ToolsConfig;
use crate::formats::{FormatRegistry, HandlerCategory, resolve_extension};

/// How long a timed-out handler gets to stop after cancellation
const CANCEL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported input format: {0}")]
    UnsupportedInput(String),

    #[error("cannot convert {input} to {requested} (allowed: {})", .allowed.join(", "))]
    UnsupportedConversion {
        input: String,
        requested: String,
        allowed: Vec<String>,
    },

    #[error("handler reported success but {path} is missing or empty")]
    EmptyOutput { path: String },

    #[error("job {job_id} timed out after {timeout:?}")]
    TimedOut { job_id: String, timeout: Duration },

    #[error("cannot stage output next to {path}: {source}")]
    Staging {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("job {job_id}: {category} handler failed converting {input} to {output}: {source}")]
    Handler {
        job_id: String,
        category: HandlerCategory,
        input: String,
        output: String,
        #[source]
        source: ConversionError,
    },
}

/// One converter per category. The struct is closed over [`HandlerCategory`],
/// so adding a category fails to compile until it has a handler here.
#[derive(Clone, bon::Builder)]
pub struct HandlerSet {
    document: Arc<dyn Converter>,
    image: Arc<dyn Converter>,
    audio: Arc<dyn Converter>,
    video: Arc<dyn Converter>,
    data: Arc<dyn Converter>,
    archive: Arc<dyn Converter>,
}

impl HandlerSet {
    pub fn get(&self, category: HandlerCategory) -> &Arc<dyn Converter> {
        match category {
            HandlerCategory::Document => &self.document,
            HandlerCategory::Image => &self.image,
            HandlerCategory::Audio => &self.audio,
            HandlerCategory::Video => &self.video,
            HandlerCategory::Data => &self.data,
            HandlerCategory::Archive => &self.archive,
        }
    }

    /// Production handlers wired to the configured external tools
    pub fn from_config(tools: &ToolsConfig, scratch_dir: Option<&Path>) -> Self {
        let runner = ToolRunner::new(tools.timeout());

        let mut archive = ArchiveHandler::new(runner.clone(), tools.unrar.clone());
        if let Some(dir) = scratch_dir {
            archive = archive.with_scratch_dir(dir);
        }

        Self::builder()
            .document(Arc::new(DocumentHandler::new(
                runner.clone(),
                tools.libreoffice.clone(),
                tools.pandoc.clone(),
            )))
            .image(Arc::new(ImageHandler::new(
                runner.clone(),
                tools.imagemagick.clone(),
            )))
            .audio(Arc::new(MediaHandler::audio(runner.clone(), tools.ffmpeg.clone())))
            .video(Arc::new(MediaHandler::video(runner, tools.ffmpeg.clone())))
            .data(Arc::new(DataHandler::new()))
            .archive(Arc::new(archive))
            .build()
    }
}

/// Routes a job to the handler for its (input, output) pair and checks the
/// handler's post-condition.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<FormatRegistry>,
    handlers: HandlerSet,
    job_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<FormatRegistry>, handlers: HandlerSet, job_timeout: Duration) -> Self {
        Self {
            registry,
            handlers,
            job_timeout,
        }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Check the pair against the registry without invoking anything
    pub fn route(&self, input: &str, requested: &str) -> Result<HandlerCategory, DispatchError> {
        let targets = self
            .registry
            .targets(input)
            .ok_or_else(|| DispatchError::UnsupportedInput(input.to_string()))?;

        self.registry
            .category_for(input, requested)
            .ok_or_else(|| DispatchError::UnsupportedConversion {
                input: input.to_string(),
                requested: requested.to_string(),
                allowed: targets.keys().cloned().collect(),
            })
    }

    pub async fn dispatch(&self, job: &ConversionJob) -> Result<DispatchReport, DispatchError> {
        let input = job.input_key();
        let output = job.output_key();
        let category = self.route(&input, &output)?;
        let handler = self.handlers.get(category);

        debug!(
            job_id = %job.job_id,
            %input,
            %output,
            %category,
            backend = handler.name(),
            "Dispatching conversion"
        );

        let cancel = CancellationToken::new();
        let mut conversion = handler.convert(job.source(), job.output(), &cancel);
        let finished = tokio::select! {
            result = &mut conversion => Some(result),
            _ = tokio::time::sleep(self.job_timeout) => None,
        };

        let Some(outcome) = finished else {
            // handlers stop their blocking work on the token; wait for it
            cancel.cancel();
            if tokio::time::timeout(CANCEL_GRACE, conversion).await.is_err() {
                warn!(job_id = %job.job_id, %category, "Handler did not stop after cancellation");
            }
            discard_output(job.output()).await;
            warn!(job_id = %job.job_id, %category, "Conversion timed out");
            return Err(DispatchError::TimedOut {
                job_id: job.job_id.clone(),
                timeout: self.job_timeout,
            });
        };

        if let Err(source) = outcome {
            discard_output(job.output()).await;
            return Err(DispatchError::Handler {
                job_id: job.job_id.clone(),
                category,
                input,
                output,
                source,
            });
        }

        let output_bytes = match tokio::fs::metadata(job.output()).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            _ => {
                discard_output(job.output()).await;
                return Err(DispatchError::EmptyOutput {
                    path: job.output().display().to_string(),
                });
            }
        };

        info!(job_id = %job.job_id, %category, output_bytes, "Conversion finished");
        Ok(DispatchReport {
            category,
            output_bytes,
        })
    }
}

impl Dispatcher {
    /// Convert `input` to `output`, picking both formats from the file names.
    ///
    /// The job writes to a temporary file next to `output`, which only
    /// replaces `output` once the conversion succeeded.
    pub async fn convert_file(
        &self,
        job_id: &str,
        input: &Path,
        output: &Path,
    ) -> Result<DispatchReport, DispatchError> {
        let input_extension = resolve_extension(&self.registry, &file_name(input));
        let output_extension = resolve_extension(&self.registry, &file_name(output));

        let staging_error = |source| DispatchError::Staging {
            path: output.display().to_string(),
            source,
        };
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let staged = tempfile::Builder::new()
            .prefix(".convertbox-")
            .suffix(&output_extension)
            .tempfile_in(parent)
            .map_err(staging_error)?
            .into_temp_path();

        let job = ConversionJob::builder()
            .job_id(job_id)
            .source_path(input)
            .input_extension(input_extension)
            .requested_output_extension(output_extension)
            .output_path(staged.to_path_buf())
            .build();

        let report = self.dispatch(&job).await?;
        staged.persist(output).map_err(|e| staging_error(e.error))?;
        Ok(report)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn discard_output(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "Failed to remove output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Converter for Counting {
        async fn convert(
            &self,
            _input: &Path,
            output: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), ConversionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(output, b"converted").await?;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct EmptyOutput;

    #[async_trait]
    impl Converter for EmptyOutput {
        async fn convert(
            &self,
            _input: &Path,
            output: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), ConversionError> {
            tokio::fs::write(output, b"").await?;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "empty"
        }
    }

    struct Failing;

    #[async_trait]
    impl Converter for Failing {
        async fn convert(
            &self,
            _input: &Path,
            output: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), ConversionError> {
            tokio::fs::write(output, b"partial").await?;
            Err(ConversionError::Processing("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct Slow;

    #[async_trait]
    impl Converter for Slow {
        async fn convert(
            &self,
            _input: &Path,
            output: &Path,
            cancel: &CancellationToken,
        ) -> Result<(), ConversionError> {
            tokio::fs::write(output, b"partial").await?;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                _ = cancel.cancelled() => Err(ConversionError::Cancelled),
            }
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn uniform(converter: Arc<dyn Converter>) -> HandlerSet {
        HandlerSet::builder()
            .document(converter.clone())
            .image(converter.clone())
            .audio(converter.clone())
            .video(converter.clone())
            .data(converter.clone())
            .archive(converter)
            .build()
    }

    fn dispatcher(converter: Arc<dyn Converter>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(FormatRegistry::builtin()),
            uniform(converter),
            Duration::from_secs(5),
        )
    }

    fn job(dir: &TempDir, input: &str, output: &str) -> ConversionJob {
        ConversionJob::builder()
            .job_id("job-1")
            .source_path(dir.path().join(format!("in{input}")))
            .input_extension(input)
            .requested_output_extension(output)
            .output_path(dir.path().join(format!("out{output}")))
            .build()
    }

    #[tokio::test]
    async fn test_unknown_input_never_invokes_handler() {
        let dir = TempDir::new().unwrap();
        let counting = Arc::new(Counting::default());
        let dispatcher = dispatcher(counting.clone());

        let err = dispatcher.dispatch(&job(&dir, ".xyz", ".pdf")).await.unwrap_err();

        assert!(matches!(err, DispatchError::UnsupportedInput(ref ext) if ext == ".xyz"));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disallowed_target_lists_allowed() {
        let dir = TempDir::new().unwrap();
        let counting = Arc::new(Counting::default());
        let dispatcher = dispatcher(counting.clone());

        let err = dispatcher.dispatch(&job(&dir, ".mp3", ".zip")).await.unwrap_err();

        let expected: Vec<String> = dispatcher
            .registry()
            .allowed_targets(".mp3")
            .into_keys()
            .collect();
        match err {
            DispatchError::UnsupportedConversion { allowed, .. } => {
                assert_eq!(allowed, expected);
                assert!(!allowed.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_dispatch_reports_category() {
        let dir = TempDir::new().unwrap();
        let counting = Arc::new(Counting::default());
        let dispatcher = dispatcher(counting.clone());

        let report = dispatcher.dispatch(&job(&dir, ".zip", ".tar.gz")).await.unwrap();

        assert_eq!(report.category, HandlerCategory::Archive);
        assert_eq!(report.output_bytes, 9);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_output_is_failure() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir, ".csv", ".json");

        let err = dispatcher(Arc::new(EmptyOutput)).dispatch(&job).await.unwrap_err();

        assert!(matches!(err, DispatchError::EmptyOutput { .. }));
        assert!(!job.output().exists());
    }

    #[tokio::test]
    async fn test_handler_failure_removes_output() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir, ".png", ".jpg");

        let err = dispatcher(Arc::new(Failing)).dispatch(&job).await.unwrap_err();

        match err {
            DispatchError::Handler { category, .. } => assert_eq!(category, HandlerCategory::Image),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!job.output().exists());
    }

    #[tokio::test]
    async fn test_timeout_removes_output() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir, ".mp4", ".webm");
        let dispatcher = Dispatcher::new(
            Arc::new(FormatRegistry::builtin()),
            uniform(Arc::new(Slow)),
            Duration::from_millis(100),
        );

        let err = dispatcher.dispatch(&job).await.unwrap_err();

        match &err {
            DispatchError::TimedOut { timeout, .. } => {
                assert_eq!(*timeout, Duration::from_millis(100))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().ends_with("timed out after 100ms"));
        assert!(!job.output().exists());
    }

    fn with_timeout(handlers: HandlerSet, timeout: Duration) -> Dispatcher {
        Dispatcher::new(Arc::new(FormatRegistry::builtin()), handlers, timeout)
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        if !dir.exists() {
            return Vec::new();
        }
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_timed_out_archive_leaves_no_workspace_or_output() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("scratch");
        let job = job(&dir, ".zip", ".tar.gz");

        let mut zip = zip::ZipWriter::new(std::fs::File::create(job.source()).unwrap());
        let stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("big.bin", stored).unwrap();
        zip.write_all(&vec![7u8; 16 * 1024 * 1024]).unwrap();
        zip.finish().unwrap();

        let archive = ArchiveHandler::new(ToolRunner::new(Duration::from_secs(30)), "unrar")
            .with_scratch_dir(&scratch);
        let dispatcher = with_timeout(uniform(Arc::new(archive)), Duration::from_millis(1));

        let err = dispatcher.dispatch(&job).await.unwrap_err();
        assert!(matches!(err, DispatchError::TimedOut { .. }));
        assert!(leftovers(&scratch).is_empty());
        assert!(!job.output().exists());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(leftovers(&scratch).is_empty());
        assert!(!job.output().exists());
        assert!(
            leftovers(dir.path())
                .iter()
                .all(|name| !name.starts_with(".partial-"))
        );
    }

    #[tokio::test]
    async fn test_timed_out_data_conversion_never_writes_output() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir, ".csv", ".json");

        let mut rows = String::from("id,name,score\n");
        for id in 0..100_000 {
            rows.push_str(&format!("{id},row-{id},{}.5\n", id % 97));
        }
        std::fs::write(job.source(), rows).unwrap();

        let dispatcher =
            with_timeout(uniform(Arc::new(DataHandler::new())), Duration::from_millis(1));

        let err = dispatcher.dispatch(&job).await.unwrap_err();
        assert!(matches!(err, DispatchError::TimedOut { .. }));
        assert!(!job.output().exists());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!job.output().exists());
        assert_eq!(leftovers(dir.path()), vec!["in.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_convert_file_keeps_existing_output_on_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("photo.png");
        let output = dir.path().join("photo.jpg");
        std::fs::write(&input, b"png").unwrap();
        std::fs::write(&output, b"keep me").unwrap();

        let err = dispatcher(Arc::new(Failing))
            .convert_file("job-1", &input, &output)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Handler { .. }));
        assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
        assert_eq!(leftovers(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_convert_file_replaces_output_on_success() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("Backup.TAR.GZ");
        let output = dir.path().join("backup.zip");
        std::fs::write(&input, b"tgz").unwrap();
        std::fs::write(&output, b"old").unwrap();
        let counting = Arc::new(Counting::default());

        let report = dispatcher(counting.clone())
            .convert_file("job-1", &input, &output)
            .await
            .unwrap();

        assert_eq!(report.category, HandlerCategory::Archive);
        assert_eq!(std::fs::read(&output).unwrap(), b"converted");
        assert_eq!(leftovers(dir.path()).len(), 2);
    }
}
