//! Archive-to-archive repackaging
//!
//! Every conversion goes through one canonical on-disk tree: the source
//! archive is unpacked into a scoped [`Workspace`], then the workspace is
//! packed into the target format. Formats never re-encode each other
//! directly, so a new format only needs one extractor and one writer.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader, SevenZWriter};
use tempfile::TempDir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use super::cancel::{Cancellable, Staged};
use super::external::ToolRunner;
use super::traits::{ConversionError, Converter};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("7z error: {0}")]
    SevenZ(String),
    #[error("symlink not allowed in archive tree: {0}")]
    Symlink(String),
    #[error("extraction tool failed: {0}")]
    Extractor(String),
    #[error("{0} archives are read-only")]
    ReadOnly(&'static str),
    #[error("cancelled")]
    Cancelled,
}

fn live(cancel: &CancellationToken) -> Result<(), ArchiveError> {
    if cancel.is_cancelled() {
        Err(ArchiveError::Cancelled)
    } else {
        Ok(())
    }
}

fn seven_zip_error(err: sevenz_rust::Error) -> ArchiveError {
    ArchiveError::SevenZ(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    SevenZ,
    Rar,
}

impl ArchiveFormat {
    /// Suffixes, longest first so `.tar.gz` wins over `.tar`
    const SUFFIXES: [(&'static str, ArchiveFormat); 6] = [
        (".tar.gz", ArchiveFormat::TarGz),
        (".tgz", ArchiveFormat::TarGz),
        (".tar", ArchiveFormat::Tar),
        (".zip", ArchiveFormat::Zip),
        (".rar", ArchiveFormat::Rar),
        (".7z", ArchiveFormat::SevenZ),
    ];

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        Self::SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, ArchiveFormat::Rar)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Rar => "rar",
        }
    }
}

/// Exclusively owned scratch directory for one conversion.
///
/// Removed with all contents when dropped, on every exit path. Blocking work
/// that writes into it takes ownership, so the directory outlives the writer.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("convertbox-ws-");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Result of unpacking one archive
#[derive(Debug, Default)]
struct ExtractStats {
    files: usize,
    skipped: Vec<String>,
}

impl ExtractStats {
    fn skip(&mut self, name: &str) {
        warn!(entry = name, "Skipping unsafe archive entry");
        self.skipped.push(name.to_string());
    }
}

/// Repackages archives between the supported formats
#[derive(Debug, Clone)]
pub struct ArchiveHandler {
    tools: ToolRunner,
    unrar: String,
    scratch_dir: Option<PathBuf>,
}

impl ArchiveHandler {
    pub fn new(tools: ToolRunner, unrar: impl Into<String>) -> Self {
        Self {
            tools,
            unrar: unrar.into(),
            scratch_dir: None,
        }
    }

    /// Create workspaces under `dir` instead of the system temp directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    async fn extract_rar(
        &self,
        input: &Path,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        let mut dest = OsString::from(root.as_os_str());
        dest.push(MAIN_SEPARATOR.to_string());

        self.tools
            .run(
                &self.unrar,
                [
                    OsStr::new("x"),
                    OsStr::new("-o+"),
                    OsStr::new("-y"),
                    input.as_os_str(),
                    dest.as_os_str(),
                ],
                cancel,
            )
            .await
            .map_err(|e| match e {
                ConversionError::Cancelled => ConversionError::Cancelled,
                other => ArchiveError::Extractor(other.to_string()).into(),
            })?;

        // the tool writes the tree itself, so check it before packing
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || collect_tree(&root).map(|_| ())).await??;
        Ok(())
    }
}

fn describe(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
impl Converter for ArchiveHandler {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError> {
        let source_format = ArchiveFormat::from_path(input)
            .ok_or_else(|| ConversionError::UnsupportedArchiveFormat(describe(input)))?;
        let target_format = ArchiveFormat::from_path(output)
            .filter(|format| format.is_writable())
            .ok_or_else(|| ConversionError::UnsupportedArchiveFormat(describe(output)))?;

        let workspace = Workspace::create(self.scratch_dir.as_deref()).map_err(ArchiveError::from)?;
        debug!(
            workspace = %workspace.path().display(),
            from = source_format.as_str(),
            to = target_format.as_str(),
            "Repackaging archive"
        );

        let workspace = match source_format {
            ArchiveFormat::Rar => {
                self.extract_rar(input, workspace.path(), cancel).await?;
                workspace
            }
            format => {
                let input = input.to_path_buf();
                let token = cancel.clone();
                let (workspace, stats) = tokio::task::spawn_blocking(move || {
                    let stats = extract(format, &input, workspace.path(), &token)?;
                    Ok::<_, ArchiveError>((workspace, stats))
                })
                .await??;
                debug!(files = stats.files, skipped = stats.skipped.len(), "Archive extracted");
                workspace
            }
        };

        let output_path = output.to_path_buf();
        let token = cancel.clone();
        let written = tokio::task::spawn_blocking(move || {
            let written = compress(target_format, workspace.path(), &output_path, &token);
            drop(workspace);
            written
        })
        .await??;

        info!(
            entries = written,
            from = source_format.as_str(),
            to = target_format.as_str(),
            "Archive repackaged"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "archive"
    }
}

/// Relative path for an archive entry name, or `None` if it would leave the root
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            p if p.contains(':') => return None,
            p => relative.push(p),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

fn create_file(root: &Path, relative: &Path) -> io::Result<File> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(target)
}

fn extract(
    format: ArchiveFormat,
    input: &Path,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractStats, ArchiveError> {
    match format {
        ArchiveFormat::Zip => extract_zip(input, root, cancel),
        ArchiveFormat::Tar => {
            extract_tar(Cancellable::new(File::open(input)?, cancel), root, cancel)
        }
        ArchiveFormat::TarGz => {
            let decoder = GzDecoder::new(Cancellable::new(File::open(input)?, cancel));
            extract_tar(decoder, root, cancel)
        }
        ArchiveFormat::SevenZ => extract_7z(input, root, cancel),
        ArchiveFormat::Rar => Err(ArchiveError::Extractor(
            "rar archives are extracted by the external tool".to_string(),
        )),
    }
}

fn extract_zip(
    input: &Path,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractStats, ArchiveError> {
    let mut archive = zip::ZipArchive::new(File::open(input)?)?;
    let mut stats = ExtractStats::default();

    for index in 0..archive.len() {
        live(cancel)?;
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        let Some(relative) = safe_relative_path(&name) else {
            stats.skip(&name);
            continue;
        };
        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            stats.skip(&name);
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(root.join(&relative))?;
        } else {
            let mut file = create_file(root, &relative)?;
            io::copy(&mut Cancellable::new(&mut entry, cancel), &mut file)?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

fn extract_tar<R: Read>(
    reader: R,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractStats, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let mut stats = ExtractStats::default();

    for entry in archive.entries()? {
        live(cancel)?;
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        let Some(relative) = safe_relative_path(&name) else {
            stats.skip(&name);
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(root.join(&relative))?;
        } else if kind.is_file() {
            let mut file = create_file(root, &relative)?;
            io::copy(&mut entry, &mut file)?;
            stats.files += 1;
        } else {
            // links, devices, fifos
            stats.skip(&name);
        }
    }

    Ok(stats)
}

fn extract_7z(
    input: &Path,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractStats, ArchiveError> {
    let mut reader = SevenZReader::open(input, Password::empty()).map_err(seven_zip_error)?;
    let mut stats = ExtractStats::default();
    let mut failure: Option<ArchiveError> = None;

    reader
        .for_each_entries(|entry, data| {
            if cancel.is_cancelled() {
                failure = Some(ArchiveError::Cancelled);
                return Ok(false);
            }

            let name = entry.name();
            let result = match safe_relative_path(name) {
                None => {
                    stats.skip(name);
                    io::copy(data, &mut io::sink()).map(|_| ())
                }
                Some(relative) if entry.is_directory() => fs::create_dir_all(root.join(relative)),
                Some(relative) => create_file(root, &relative).and_then(|mut file| {
                    stats.files += 1;
                    io::copy(&mut Cancellable::new(data, cancel), &mut file).map(|_| ())
                }),
            };

            match result {
                Ok(()) => Ok(true),
                Err(err) => {
                    failure = Some(err.into());
                    Ok(false)
                }
            }
        })
        .map_err(seven_zip_error)?;

    match failure {
        Some(err) => Err(err),
        None => Ok(stats),
    }
}

/// One node of the workspace tree, named relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq)]
enum TreeEntry {
    Dir { path: PathBuf, name: String },
    File { path: PathBuf, name: String },
}

fn sorted_children(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    children.sort();
    Ok(children)
}

fn archive_name(root: &Path, path: &Path) -> io::Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is outside the workspace", path.display()),
        )
    })?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

fn walk(root: &Path, path: &Path, entries: &mut Vec<TreeEntry>) -> Result<(), ArchiveError> {
    let metadata = fs::symlink_metadata(path)?;
    let name = archive_name(root, path)?;

    if metadata.file_type().is_symlink() {
        return Err(ArchiveError::Symlink(name));
    }

    if metadata.is_dir() {
        entries.push(TreeEntry::Dir {
            path: path.to_path_buf(),
            name,
        });
        for child in sorted_children(path)? {
            walk(root, &child, entries)?;
        }
    } else if metadata.is_file() {
        entries.push(TreeEntry::File {
            path: path.to_path_buf(),
            name,
        });
    }

    Ok(())
}

/// Walk the workspace from its immediate children down, parents first
fn collect_tree(root: &Path) -> Result<Vec<TreeEntry>, ArchiveError> {
    let mut entries = Vec::new();
    for child in sorted_children(root)? {
        walk(root, &child, &mut entries)?;
    }
    Ok(entries)
}

/// Pack the workspace into `output`, staged next to it and renamed on success
fn compress(
    format: ArchiveFormat,
    root: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<usize, ConversionError> {
    let entries = collect_tree(root)?;
    let staging = Staged::next_to(output)?;

    match format {
        ArchiveFormat::Zip => write_zip(staging.as_file(), &entries, cancel)?,
        ArchiveFormat::Tar => {
            write_tar(tar::Builder::new(staging.as_file()), &entries, cancel)?;
        }
        ArchiveFormat::TarGz => {
            let encoder = GzEncoder::new(staging.as_file(), Compression::default());
            write_tar(tar::Builder::new(encoder), &entries, cancel)?.finish()?;
        }
        ArchiveFormat::SevenZ => write_7z(staging.as_file(), &entries, cancel)?,
        ArchiveFormat::Rar => return Err(ArchiveError::ReadOnly("rar").into()),
    }

    staging.persist(output, cancel)?;
    Ok(entries.len())
}

fn zip_options(permissions: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(permissions)
}

fn write_zip<W: Write + Seek>(
    writer: W,
    entries: &[TreeEntry],
    cancel: &CancellationToken,
) -> Result<(), ArchiveError> {
    let mut zip = zip::ZipWriter::new(writer);

    for entry in entries {
        live(cancel)?;
        match entry {
            TreeEntry::Dir { name, .. } => {
                zip.add_directory(name.as_str(), zip_options(0o755))?;
            }
            TreeEntry::File { path, name } => {
                zip.start_file(name.as_str(), zip_options(0o644))?;
                let mut source = Cancellable::new(File::open(path)?, cancel);
                io::copy(&mut source, &mut zip)?;
            }
        }
    }

    zip.finish()?;
    Ok(())
}

fn write_tar<W: Write>(
    mut builder: tar::Builder<W>,
    entries: &[TreeEntry],
    cancel: &CancellationToken,
) -> Result<W, ArchiveError> {
    builder.follow_symlinks(false);

    for entry in entries {
        live(cancel)?;
        match entry {
            TreeEntry::Dir { path, name } => builder.append_dir(name, path)?,
            TreeEntry::File { path, name } => {
                let source = File::open(path)?;
                let mut header = tar::Header::new_gnu();
                header.set_metadata(&source.metadata()?);
                builder.append_data(&mut header, name, Cancellable::new(source, cancel))?;
            }
        }
    }

    Ok(builder.into_inner()?)
}

fn write_7z<W: Write + Seek>(
    writer: W,
    entries: &[TreeEntry],
    cancel: &CancellationToken,
) -> Result<(), ArchiveError> {
    let mut sz = SevenZWriter::new(writer).map_err(seven_zip_error)?;

    for entry in entries {
        live(cancel)?;
        match entry {
            TreeEntry::Dir { path, name } => {
                sz.push_archive_entry::<&[u8]>(
                    SevenZArchiveEntry::from_path(path, name.clone()),
                    None,
                )
                .map_err(seven_zip_error)?;
            }
            TreeEntry::File { path, name } => {
                let source = Cancellable::new(File::open(path)?, cancel);
                sz.push_archive_entry(
                    SevenZArchiveEntry::from_path(path, name.clone()),
                    Some(source),
                )
                .map_err(seven_zip_error)?;
            }
        }
    }

    sz.finish()?;
    Ok(())
}
