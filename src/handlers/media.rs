use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::external::ToolRunner;
use super::traits::{ConversionError, Converter};

/// Audio and video transcoding through ffmpeg. The container and codecs are
/// chosen by ffmpeg from the output extension.
#[derive(Debug, Clone)]
pub struct MediaHandler {
    tools: ToolRunner,
    ffmpeg: String,
    kind: &'static str,
}

impl MediaHandler {
    pub fn audio(tools: ToolRunner, ffmpeg: impl Into<String>) -> Self {
        Self {
            tools,
            ffmpeg: ffmpeg.into(),
            kind: "audio",
        }
    }

    pub fn video(tools: ToolRunner, ffmpeg: impl Into<String>) -> Self {
        Self {
            tools,
            ffmpeg: ffmpeg.into(),
            kind: "video",
        }
    }
}

#[async_trait]
impl Converter for MediaHandler {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        self.tools
            .run(
                &self.ffmpeg,
                [
                    OsStr::new("-y"),
                    OsStr::new("-loglevel"),
                    OsStr::new("error"),
                    OsStr::new("-i"),
                    input.as_os_str(),
                    output.as_os_str(),
                ],
                cancel,
            )
            .await
    }

    fn name(&self) -> &'static str {
        self.kind
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_ffmpeg_is_tool_failure() {
        let handler = MediaHandler::video(
            ToolRunner::new(Duration::from_secs(1)),
            "convertbox-no-ffmpeg",
        );
        assert_eq!(handler.name(), "video");

        let err = handler
            .convert(
                Path::new("in.mp4"),
                Path::new("out.webm"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            ConversionError::ExternalToolFailed { tool, .. } => {
                assert_eq!(tool, "convertbox-no-ffmpeg")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
