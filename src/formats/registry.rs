use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::resolver::normalize_extension;

/// Conversion family a (input, output) pair is routed to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HandlerCategory {
    Document,
    Image,
    Audio,
    Video,
    Data,
    Archive,
}

impl HandlerCategory {
    pub const ALL: [HandlerCategory; 6] = [
        HandlerCategory::Document,
        HandlerCategory::Image,
        HandlerCategory::Audio,
        HandlerCategory::Video,
        HandlerCategory::Data,
        HandlerCategory::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerCategory::Document => "document",
            HandlerCategory::Image => "image",
            HandlerCategory::Audio => "audio",
            HandlerCategory::Video => "video",
            HandlerCategory::Data => "data",
            HandlerCategory::Archive => "archive",
        }
    }
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the compatibility matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatEntry {
    pub input_extension: String,
    pub output_extension: String,
    pub category: HandlerCategory,
}

impl FormatEntry {
    pub fn new(input: &str, output: &str, category: HandlerCategory) -> Self {
        Self {
            input_extension: normalize_extension(input),
            output_extension: normalize_extension(output),
            category,
        }
    }
}

/// Allowed output extension -> handler category, for one input extension
pub type TargetMap = BTreeMap<String, HandlerCategory>;

/// Immutable compatibility matrix
///
/// Built once at startup and shared behind an `Arc`; all lookups take
/// `&self` so concurrent readers need no locking.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    table: BTreeMap<String, TargetMap>,
    /// Input keys, longest first, for compound-suffix matching
    keys_by_length: Vec<String>,
}

/// Pairs the office suite converts natively
pub(crate) const OFFICE_SUITE: &[(&str, &[&str])] = &[
    (".odt", &["docx", "pdf", "txt", "html", "rtf"]),
    (".ods", &["xlsx", "csv", "pdf"]),
    (".odp", &["pptx", "pdf"]),
    (".docx", &["pdf", "odt", "txt", "html", "rtf"]),
    (".xlsx", &["csv", "ods", "pdf", "html"]),
    (".pptx", &["pdf", "html", "odp"]),
    (".csv", &["xlsx", "ods", "pdf"]),
];

const MARKUP: &[(&str, &[&str])] = &[
    (".md", &["html", "pdf", "docx"]),
    (".html", &["pdf", "docx", "md", "txt"]),
    (".txt", &["docx", "pdf", "html", "md"]),
    (".rtf", &["docx", "pdf", "odt", "txt"]),
];

const RASTER_INPUTS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".webp", ".bmp", ".gif", ".tiff", ".ico",
];
const RASTER_OUTPUTS: &[&str] = &[".png", ".jpg", ".webp", ".bmp", ".gif", ".tiff", ".ico"];

const AUDIO_INPUTS: &[&str] = &[".mp3", ".wav", ".ogg", ".flac", ".aac", ".m4a"];
const AUDIO_OUTPUTS: &[&str] = &[".mp3", ".wav", ".ogg", ".flac", ".aac"];

const VIDEO_FORMATS: &[&str] = &[".mp4", ".avi", ".mkv", ".mov", ".webm"];
const VIDEO_AUDIO_TRACKS: &[&str] = &[".mp3", ".wav"];

const DATA: &[(&str, &[&str])] = &[
    (".csv", &["json", "yaml", "xml"]),
    (".json", &["csv", "yaml", "xml"]),
    (".yaml", &["json", "csv", "xml"]),
    (".yml", &["json", "csv", "xml"]),
    (".xml", &["csv", "json", "yaml"]),
];

const ARCHIVE_READABLE: &[&str] = &[".zip", ".tar", ".tar.gz", ".tgz", ".7z", ".rar"];
const ARCHIVE_WRITABLE: &[&str] = &[".zip", ".tar", ".tar.gz", ".7z"];

/// Extensions that name the same on-disk format
fn canonical(ext: &str) -> &str {
    match ext {
        ".jpeg" => ".jpg",
        ".tgz" => ".tar.gz",
        ".yml" => ".yaml",
        ".tif" => ".tiff",
        other => other,
    }
}

fn push_cross(
    entries: &mut Vec<FormatEntry>,
    inputs: &[&str],
    outputs: &[&str],
    category: HandlerCategory,
) {
    for input in inputs {
        for output in outputs {
            if canonical(input) != canonical(output) {
                entries.push(FormatEntry::new(input, output, category));
            }
        }
    }
}

fn push_table(
    entries: &mut Vec<FormatEntry>,
    table: &[(&str, &[&str])],
    category: HandlerCategory,
) {
    for (input, outputs) in table {
        for output in *outputs {
            entries.push(FormatEntry::new(input, output, category));
        }
    }
}

impl FormatRegistry {
    /// Build a registry from explicit rows; extensions are case-normalized.
    ///
    /// A later row for the same (input, output) pair replaces an earlier one.
    pub fn from_entries(entries: impl IntoIterator<Item = FormatEntry>) -> Self {
        let mut table: BTreeMap<String, TargetMap> = BTreeMap::new();
        for entry in entries {
            let input = normalize_extension(&entry.input_extension);
            let output = normalize_extension(&entry.output_extension);
            if input.is_empty() || output.is_empty() {
                continue;
            }
            table.entry(input).or_default().insert(output, entry.category);
        }

        let mut keys_by_length: Vec<String> = table.keys().cloned().collect();
        keys_by_length.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self {
            table,
            keys_by_length,
        }
    }

    /// The full builtin compatibility matrix
    pub fn builtin() -> Self {
        let mut entries = Vec::new();

        push_table(&mut entries, OFFICE_SUITE, HandlerCategory::Document);
        push_table(&mut entries, MARKUP, HandlerCategory::Document);

        push_cross(&mut entries, RASTER_INPUTS, RASTER_OUTPUTS, HandlerCategory::Image);
        push_cross(
            &mut entries,
            &[".svg"],
            &[".png", ".jpg", ".webp"],
            HandlerCategory::Image,
        );

        push_cross(&mut entries, AUDIO_INPUTS, AUDIO_OUTPUTS, HandlerCategory::Audio);

        push_cross(&mut entries, VIDEO_FORMATS, VIDEO_FORMATS, HandlerCategory::Video);
        push_cross(
            &mut entries,
            VIDEO_FORMATS,
            VIDEO_AUDIO_TRACKS,
            HandlerCategory::Video,
        );

        push_table(&mut entries, DATA, HandlerCategory::Data);

        push_cross(
            &mut entries,
            ARCHIVE_READABLE,
            ARCHIVE_WRITABLE,
            HandlerCategory::Archive,
        );

        Self::from_entries(entries)
    }

    /// Allowed targets for an input extension; empty when the input is unknown
    pub fn allowed_targets(&self, input_extension: &str) -> TargetMap {
        self.targets(input_extension).cloned().unwrap_or_default()
    }

    pub fn targets(&self, input_extension: &str) -> Option<&TargetMap> {
        self.table.get(&normalize_extension(input_extension))
    }

    pub fn contains_input(&self, input_extension: &str) -> bool {
        self.targets(input_extension).is_some()
    }

    pub fn is_supported(&self, input_extension: &str, output_extension: &str) -> bool {
        self.category_for(input_extension, output_extension).is_some()
    }

    pub fn category_for(
        &self,
        input_extension: &str,
        output_extension: &str,
    ) -> Option<HandlerCategory> {
        self.targets(input_extension)?
            .get(&normalize_extension(output_extension))
            .copied()
    }

    /// Input extensions ordered longest first
    pub fn keys_by_length(&self) -> &[String] {
        &self.keys_by_length
    }

    /// Every (input, output, category) row
    pub fn entries(&self) -> impl Iterator<Item = FormatEntry> + '_ {
        self.table.iter().flat_map(|(input, targets)| {
            targets.iter().map(move |(output, category)| FormatEntry {
                input_extension: input.clone(),
                output_extension: output.clone(),
                category: *category,
            })
        })
    }

    /// Short display label, e.g. `.tar.gz` -> `TAR.GZ`
    pub fn label(extension: &str) -> String {
        normalize_extension(extension)
            .trim_start_matches('.')
            .to_uppercase()
    }

    /// Descriptive name for an extension, falling back to its label
    pub fn format_name(extension: &str) -> String {
        let name = match normalize_extension(extension).as_str() {
            ".pdf" => "PDF Document",
            ".docx" => "Word Document",
            ".odt" => "OpenDocument Text",
            ".rtf" => "Rich Text Format",
            ".txt" => "Plain Text",
            ".html" => "HTML Page",
            ".md" => "Markdown",
            ".xlsx" => "Excel Spreadsheet",
            ".ods" => "OpenDocument Spreadsheet",
            ".pptx" => "PowerPoint Presentation",
            ".odp" => "OpenDocument Presentation",
            ".csv" => "Comma-Separated Values",
            ".json" => "JSON Records",
            ".yaml" | ".yml" => "YAML Records",
            ".xml" => "XML Records",
            ".png" => "PNG Image",
            ".jpg" | ".jpeg" => "JPEG Image",
            ".webp" => "WebP Image",
            ".bmp" => "Bitmap Image",
            ".gif" => "GIF Image",
            ".tiff" => "TIFF Image",
            ".ico" => "Icon",
            ".svg" => "SVG Vector Image",
            ".mp3" => "MP3 Audio",
            ".wav" => "WAV Audio",
            ".ogg" => "Ogg Vorbis Audio",
            ".flac" => "FLAC Audio",
            ".aac" => "AAC Audio",
            ".m4a" => "MPEG-4 Audio",
            ".mp4" => "MP4 Video",
            ".avi" => "AVI Video",
            ".mkv" => "Matroska Video",
            ".mov" => "QuickTime Video",
            ".webm" => "WebM Video",
            ".zip" => "ZIP Archive",
            ".tar" => "Tar Archive",
            ".tar.gz" | ".tgz" => "Gzipped Tar Archive",
            ".7z" => "7-Zip Archive",
            ".rar" => "RAR Archive",
            _ => return Self::label(extension),
        };
        name.to_string()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
