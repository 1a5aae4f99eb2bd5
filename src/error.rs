//! Error types shared by the codecs and the conversion pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::format::RecordError;

/// Failures that abort a whole import or export.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Source unreadable, structurally corrupt or not writable.
    #[error("{0}")]
    Fatal(String),

    /// No registered codec recognized the input.
    #[error("can't autodetect format of {}", .0.display())]
    UnknownFormat(PathBuf),
}

/// Option combinations rejected before any codec runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("single-file and directory output can't be forced together")]
    IncompatibleShape,

    #[error("directory output is applicable only to vCard formats")]
    DirectoryNeedsCardFormat,

    #[error("output file already exists: {} (use overwrite if necessary)", .0.display())]
    OutputExists(PathBuf),

    #[error("output path is missing")]
    MissingOutput,

    #[error("unknown country rule #{0}")]
    UnknownCountryRule(usize),
}

/// A codec failure in the pipeline, carrying the record errors collected
/// before it so none of them is lost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to {action} {}", .path.display())]
pub struct PipelineError {
    /// `read` or `write`.
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: CodecError,
    pub errors: Vec<RecordError>,
}
