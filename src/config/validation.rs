use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_upload_bytes must be positive")]
    InvalidUploadLimit,

    #[error("Timeout must be positive: {field} = {value}")]
    InvalidTimeout { field: String, value: u64 },

    #[error("job_timeout_secs ({job}) is shorter than tools.timeout_secs ({tool})")]
    JobTimeoutTooShort { job: u64, tool: u64 },

    #[error("upload_dir and output_dir must differ (both are '{path}')")]
    SharedDirectories { path: String },

    #[error("Tool '{tool}' has an empty program name")]
    EmptyToolProgram { tool: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_limits(config)?;
    validate_timeouts(config)?;
    validate_storage(config)?;
    validate_tools(config)?;
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    if config.server.api.max_upload_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidUploadLimit);
    }
    Ok(())
}

fn validate_timeouts(config: &Config) -> Result<(), ValidationError> {
    let tool = config.tools.timeout_secs;
    let job = config.conversion.job_timeout_secs;

    if tool == 0 {
        return Err(ValidationError::InvalidTimeout {
            field: "tools.timeout_secs".to_string(),
            value: tool,
        });
    }

    if job == 0 {
        return Err(ValidationError::InvalidTimeout {
            field: "conversion.job_timeout_secs".to_string(),
            value: job,
        });
    }

    // A dispatch must be able to outlive at least one tool run
    if job < tool {
        return Err(ValidationError::JobTimeoutTooShort { job, tool });
    }

    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.upload_dir == config.storage.output_dir {
        return Err(ValidationError::SharedDirectories {
            path: config.storage.upload_dir.display().to_string(),
        });
    }
    Ok(())
}

fn validate_tools(config: &Config) -> Result<(), ValidationError> {
    for (tool, program) in config.tools.programs() {
        if program.trim().is_empty() {
            return Err(ValidationError::EmptyToolProgram {
                tool: tool.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    #[test]
    fn test_valid_config() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_upload_limit() {
        let mut config = Config::default();
        config.server.api.max_upload_bytes = ByteSize(0);

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::InvalidUploadLimit)));
    }

    #[test]
    fn test_zero_tool_timeout() {
        let mut config = Config::default();
        config.tools.timeout_secs = 0;

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidTimeout { ref field, .. }) if field == "tools.timeout_secs"
        ));
    }

    #[test]
    fn test_job_timeout_shorter_than_tool() {
        let mut config = Config::default();
        config.tools.timeout_secs = 600;
        config.conversion.job_timeout_secs = 60;

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::JobTimeoutTooShort { job: 60, tool: 600 })
        ));
    }

    #[test]
    fn test_shared_directories() {
        let mut config = Config::default();
        config.storage.output_dir = config.storage.upload_dir.clone();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::SharedDirectories { .. })));
    }

    #[test]
    fn test_empty_tool_program() {
        let mut config = Config::default();
        config.tools.ffmpeg = "  ".to_string();

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::EmptyToolProgram { ref tool }) if tool == "ffmpeg"
        ));
    }
}
