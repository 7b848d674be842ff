use std::path::{Path, PathBuf};

use crate::formats::{HandlerCategory, normalize_extension};

/// One conversion request, created per upload
#[derive(Debug, Clone, bon::Builder)]
pub struct ConversionJob {
    #[builder(into)]
    pub job_id: String,
    #[builder(into)]
    pub source_path: PathBuf,
    #[builder(into)]
    pub input_extension: String,
    #[builder(into)]
    pub requested_output_extension: String,
    #[builder(into)]
    pub output_path: PathBuf,
}

impl ConversionJob {
    pub fn source(&self) -> &Path {
        &self.source_path
    }

    pub fn output(&self) -> &Path {
        &self.output_path
    }

    /// Input extension in registry form
    pub fn input_key(&self) -> String {
        normalize_extension(&self.input_extension)
    }

    /// Requested output extension in registry form
    pub fn output_key(&self) -> String {
        normalize_extension(&self.requested_output_extension)
    }
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub category: HandlerCategory,
    pub output_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_keys_are_normalized() {
        let job = ConversionJob::builder()
            .job_id("job-1")
            .source_path("/tmp/in.CSV")
            .input_extension("CSV")
            .requested_output_extension(".Json")
            .output_path("/tmp/out.json")
            .build();

        assert_eq!(job.input_key(), ".csv");
        assert_eq!(job.output_key(), ".json");
        assert_eq!(job.source(), Path::new("/tmp/in.CSV"));
    }
}
