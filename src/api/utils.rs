//! API utility functions
//!
//! Pure, stateless helpers for building responses, kept out of services.rs
//! so they can be unit tested.

use crate::api::models::TargetFormat;
use crate::formats::{FormatRegistry, normalize_extension};

/// `Content-Disposition` value for an attachment download. Quotes and
/// control characters are dropped from the name.
pub fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

/// Media type for a download, from its extension
pub fn content_type_for(extension: &str) -> mime::Mime {
    let essence = match normalize_extension(extension).as_str() {
        ".pdf" => "application/pdf",
        ".json" => "application/json",
        ".csv" => "text/csv",
        ".txt" => "text/plain; charset=utf-8",
        ".html" => "text/html; charset=utf-8",
        ".md" => "text/markdown",
        ".yaml" | ".yml" => "application/yaml",
        ".xml" => "application/xml",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".bmp" => "image/bmp",
        ".webp" => "image/webp",
        ".tiff" => "image/tiff",
        ".ico" => "image/x-icon",
        ".svg" => "image/svg+xml",
        ".mp3" => "audio/mpeg",
        ".wav" => "audio/wav",
        ".ogg" => "audio/ogg",
        ".flac" => "audio/flac",
        ".aac" => "audio/aac",
        ".mp4" => "video/mp4",
        ".webm" => "video/webm",
        ".mkv" => "video/x-matroska",
        ".avi" => "video/x-msvideo",
        ".mov" => "video/quicktime",
        ".zip" => "application/zip",
        ".tar" => "application/x-tar",
        ".tar.gz" => "application/gzip",
        ".7z" => "application/x-7z-compressed",
        _ => return mime::APPLICATION_OCTET_STREAM,
    };
    essence.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

/// Allowed targets for `input`, decorated for display
pub fn target_formats(registry: &FormatRegistry, input: &str) -> Vec<TargetFormat> {
    registry
        .allowed_targets(input)
        .into_iter()
        .map(|(extension, category)| TargetFormat {
            label: FormatRegistry::label(&extension),
            format_name: FormatRegistry::format_name(&extension),
            extension,
            category,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::HandlerCategory;

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("converted.tar.gz"),
            "attachment; filename=\"converted.tar.gz\""
        );
        assert_eq!(
            content_disposition("a\"b\r\n.zip"),
            "attachment; filename=\"ab.zip\""
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(".json"), mime::APPLICATION_JSON);
        assert_eq!(content_type_for("PNG"), mime::IMAGE_PNG);
        assert_eq!(content_type_for(".tar.gz").essence_str(), "application/gzip");
        assert_eq!(content_type_for(".unknown"), mime::APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn test_target_formats() {
        let registry = FormatRegistry::builtin();
        let targets = target_formats(&registry, ".zip");

        let extensions: Vec<_> = targets.iter().map(|t| t.extension.as_str()).collect();
        assert_eq!(extensions, vec![".7z", ".tar", ".tar.gz"]);
        assert!(targets.iter().all(|t| t.category == HandlerCategory::Archive));
        assert_eq!(targets[2].label, "TAR.GZ");

        assert!(target_formats(&registry, ".xyz").is_empty());
    }
}
