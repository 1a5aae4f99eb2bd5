//! Codec contract, diagnostics and format detection.

pub mod backup;
pub mod remote;
pub mod vcard;
pub mod vcf;
pub mod vcf_dir;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use clap::ValueEnum;
use tracing::debug;

use crate::contact::ContactList;
use crate::error::CodecError;

pub use backup::BackupFormat;
pub use remote::{RemoteBook, RemoteCard, RemoteFormat};
pub use vcard::{CardOptions, CardVersion, VersionPolicy};
pub use vcf::VcfFormat;
pub use vcf_dir::VcfDirFormat;

/// How many leading bytes the sniffer looks at.
const SNIFF_LEN: usize = 512;

/// A malformed record or field inside an otherwise readable source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors accumulated by one codec run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    errors: Vec<RecordError>,
    fatal: Option<String>,
}

impl Diagnostics {
    pub fn clear(&mut self) {
        self.errors.clear();
        self.fatal = None;
    }

    pub fn record(&mut self, line: Option<usize>, message: impl Into<String>) {
        let err = RecordError {
            line,
            message: message.into(),
        };
        // Callers report the collected errors; this is only a trace.
        debug!("{err}");
        self.errors.push(err);
    }

    /// Store a fatal error and hand it back for propagation.
    pub fn fatal(&mut self, message: impl Into<String>) -> CodecError {
        let message = message.into();
        debug!("fatal: {message}");
        self.fatal = Some(message.clone());
        CodecError::Fatal(message)
    }

    /// Take over the errors of a nested parse, prefixing their messages.
    pub fn absorb(&mut self, other: Diagnostics, prefix: &str) {
        for err in other.errors {
            self.errors.push(RecordError {
                line: err.line,
                message: format!("{prefix}{}", err.message),
            });
        }
    }

    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal.as_deref()
    }
}

/// One on-disk or wire representation of a contact list.
pub trait Codec {
    /// Cheap sniff of a candidate input. Never fails; unreadable input is
    /// simply not recognized.
    fn detect(path: &Path) -> bool
    where
        Self: Sized;

    /// Parse `source` into `list`, clearing it first unless `append` is set.
    /// Record errors are collected in [`Codec::diagnostics`]; only a fatal
    /// error makes this return `Err`.
    fn import_records(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError>;

    fn export_records(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError>;

    fn diagnostics(&self) -> &Diagnostics;

    fn errors(&self) -> &[RecordError] {
        self.diagnostics().errors()
    }

    fn fatal_error(&self) -> Option<&str> {
        self.diagnostics().fatal_error()
    }
}

/// File-system representations the factory can pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Vcf,
    Backup,
    Directory,
}

impl FormatKind {
    pub fn label(self) -> &'static str {
        match self {
            FormatKind::Vcf => "vCard file",
            FormatKind::Backup => "phone backup",
            FormatKind::Directory => "vCard directory",
        }
    }
}

/// Output format selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatToken {
    /// vCard 2.1
    #[value(name = "vcf21")]
    Vcf21,
    /// vCard 3.0
    #[value(name = "vcf30")]
    Vcf30,
    /// vCard, version as in the input
    #[value(name = "vcfauto")]
    VcfAuto,
    /// Binary phone backup
    Backup,
    /// Directory with one vCard per record
    Dir,
    /// Same as the detected input format
    Copy,
}

impl FormatToken {
    pub fn is_card(self) -> bool {
        matches!(
            self,
            FormatToken::Vcf21 | FormatToken::Vcf30 | FormatToken::VcfAuto | FormatToken::Dir
        )
    }

    pub fn version_policy(self) -> VersionPolicy {
        match self {
            FormatToken::Vcf21 => VersionPolicy::Legacy,
            FormatToken::Vcf30 => VersionPolicy::Current,
            _ => VersionPolicy::AsDetected,
        }
    }
}

/// Classify a file from its leading bytes and extension, card format first.
pub fn sniff(head: &[u8], extension: Option<&str>) -> Option<FormatKind> {
    if vcf::looks_like_cards(head, extension) {
        Some(FormatKind::Vcf)
    } else if backup::looks_like_backup(head, extension) {
        Some(FormatKind::Backup)
    } else {
        None
    }
}

/// First bytes of a file, or `None` when it can't be read.
pub(crate) fn read_head(path: &Path) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).ok()?;
    Some(head)
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Resolve a path to its format. Directories always use the directory codec.
pub fn detect_kind(path: &Path) -> Result<FormatKind, CodecError> {
    if VcfDirFormat::detect(path) {
        return Ok(FormatKind::Directory);
    }
    let head = read_head(path).unwrap_or_default();
    sniff(&head, extension_of(path).as_deref())
        .ok_or_else(|| CodecError::UnknownFormat(path.to_path_buf()))
}

/// Closed set of codecs behind one interface.
pub enum AnyCodec {
    Vcf(VcfFormat),
    Backup(BackupFormat),
    Directory(VcfDirFormat),
    Remote(RemoteFormat),
}

pub fn create_codec(kind: FormatKind, options: CardOptions) -> AnyCodec {
    match kind {
        FormatKind::Vcf => AnyCodec::Vcf(VcfFormat::new(options)),
        FormatKind::Backup => AnyCodec::Backup(BackupFormat::new(options)),
        FormatKind::Directory => AnyCodec::Directory(VcfDirFormat::new(options)),
    }
}

/// Detect the format of `path` and build the matching codec.
pub fn codec_for_path(path: &Path, options: CardOptions) -> Result<AnyCodec, CodecError> {
    Ok(create_codec(detect_kind(path)?, options))
}

impl AnyCodec {
    fn inner(&self) -> &dyn DynCodec {
        match self {
            AnyCodec::Vcf(c) => c,
            AnyCodec::Backup(c) => c,
            AnyCodec::Directory(c) => c,
            AnyCodec::Remote(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn DynCodec {
        match self {
            AnyCodec::Vcf(c) => c,
            AnyCodec::Backup(c) => c,
            AnyCodec::Directory(c) => c,
            AnyCodec::Remote(c) => c,
        }
    }

    pub fn import_records(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError> {
        self.inner_mut().import_dyn(source, list, append)
    }

    pub fn export_records(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError> {
        self.inner_mut().export_dyn(dest, list)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.inner().diagnostics_dyn()
    }

    pub fn errors(&self) -> &[RecordError] {
        self.diagnostics().errors()
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.diagnostics().fatal_error()
    }
}

impl From<RemoteFormat> for AnyCodec {
    fn from(codec: RemoteFormat) -> Self {
        AnyCodec::Remote(codec)
    }
}

// Object-safe view of `Codec`, which itself has a `Self: Sized` detector.
trait DynCodec {
    fn import_dyn(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError>;
    fn export_dyn(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError>;
    fn diagnostics_dyn(&self) -> &Diagnostics;
}

impl<T: Codec> DynCodec for T {
    fn import_dyn(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError> {
        self.import_records(source, list, append)
    }

    fn export_dyn(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError> {
        self.export_records(dest, list)
    }

    fn diagnostics_dyn(&self) -> &Diagnostics {
        self.diagnostics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_prefers_card_text() {
        assert_eq!(sniff(b"BEGIN:VCARD\r\n", None), Some(FormatKind::Vcf));
        assert_eq!(sniff(b"\xEF\xBB\xBF\r\nbegin:vcard\n", Some("txt")), Some(FormatKind::Vcf));
        assert_eq!(sniff(b"", Some("vcf")), Some(FormatKind::Vcf));
        assert_eq!(sniff(b"CBAK\x01\x00\x00\x00", None), Some(FormatKind::Backup));
        assert_eq!(sniff(b"", Some("cbk")), Some(FormatKind::Backup));
        assert_eq!(sniff(b"hello", Some("txt")), None);
    }

    #[test]
    fn detect_kind_handles_directories_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_kind(dir.path()).unwrap(), FormatKind::Directory);

        let odd = dir.path().join("notes.txt");
        std::fs::write(&odd, "plain text").unwrap();
        assert_eq!(
            detect_kind(&odd),
            Err(CodecError::UnknownFormat(odd.clone()))
        );

        let missing = dir.path().join("missing.bin");
        assert!(detect_kind(&missing).is_err());
    }

    #[test]
    fn record_error_display_includes_line() {
        let mut diag = Diagnostics::default();
        diag.record(Some(7), "Invalid datetime: 1999-13-01");
        diag.record(None, "2 unknown tags found");
        let lines: Vec<String> = diag.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(lines, ["line 7: Invalid datetime: 1999-13-01", "2 unknown tags found"]);
        assert!(diag.fatal_error().is_none());

        let err = diag.fatal("broken");
        assert_eq!(err, CodecError::Fatal("broken".into()));
        assert_eq!(diag.fatal_error(), Some("broken"));
    }

    #[test]
    fn token_maps_to_version_policy() {
        assert_eq!(FormatToken::Vcf21.version_policy(), VersionPolicy::Legacy);
        assert_eq!(FormatToken::Vcf30.version_policy(), VersionPolicy::Current);
        assert_eq!(FormatToken::Copy.version_policy(), VersionPolicy::AsDetected);
        assert!(FormatToken::Dir.is_card());
        assert!(!FormatToken::Backup.is_card());
    }
}
