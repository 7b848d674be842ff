use super::registry::FormatRegistry;

/// Normalize a user- or table-supplied extension: trimmed, lower-case,
/// with a single leading dot. Returns an empty string for empty input.
pub fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    format!(".{}", trimmed.to_lowercase())
}

/// Resolve the canonical input extension of a filename.
///
/// Registry keys are tried longest first so `archive.tar.gz` resolves to
/// `.tar.gz` rather than `.gz`. Unknown suffixes fall back to everything
/// after the last dot; a name without one resolves to `""`.
pub fn resolve_extension(registry: &FormatRegistry, filename: &str) -> String {
    let lowered = filename.trim().to_lowercase();

    for key in registry.keys_by_length() {
        if lowered.ends_with(key.as_str()) {
            return key.clone();
        }
    }

    match lowered.rfind('.') {
        Some(pos) if pos + 1 < lowered.len() => {
            let ext = &lowered[pos..];
            if ext.contains(['/', '\\']) {
                String::new()
            } else {
                ext.to_string()
            }
        }
        _ => String::new(),
    }
}
