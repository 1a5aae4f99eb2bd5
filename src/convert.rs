//! Batch pipeline: validate, read, transform, write.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::compare::{compare_with, PairState};
use crate::config::Config;
use crate::contact::ContactList;
use crate::country;
use crate::error::{PipelineError, ValidationError};
use crate::format::{
    create_codec, detect_kind, FormatKind, FormatToken, RecordError, VersionPolicy,
};
use crate::stats::Statistics;
use crate::transform::Transformations;

/// Whether the output is one file or a directory of cards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputShape {
    /// Same shape as the input.
    #[default]
    AsInput,
    SingleFile,
    Directory,
}

impl OutputShape {
    pub fn from_flags(single_file: bool, directory: bool) -> Result<Self, ValidationError> {
        match (single_file, directory) {
            (true, true) => Err(ValidationError::IncompatibleShape),
            (true, false) => Ok(OutputShape::SingleFile),
            (false, true) => Ok(OutputShape::Directory),
            (false, false) => Ok(OutputShape::AsInput),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: FormatToken,
    pub shape: OutputShape,
    pub overwrite: bool,
    pub transforms: Transformations,
    /// Country rule ordinal for phone prefix expansion.
    pub intl_prefix: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub records: usize,
    pub input_kind: FormatKind,
    pub output_kind: FormatKind,
    pub read_errors: Vec<RecordError>,
    pub write_errors: Vec<RecordError>,
}

impl ConvertReport {
    pub fn errors(&self) -> impl Iterator<Item = &RecordError> {
        self.read_errors.iter().chain(&self.write_errors)
    }
}

/// Check option combinations before any codec runs.
pub fn validate(request: &ConvertRequest) -> Result<Transformations, ValidationError> {
    if request.output.as_os_str().is_empty() {
        return Err(ValidationError::MissingOutput);
    }
    match (request.shape, request.format) {
        (OutputShape::SingleFile, FormatToken::Dir) => {
            return Err(ValidationError::IncompatibleShape)
        }
        (OutputShape::Directory, token) if !token.is_card() && token != FormatToken::Copy => {
            return Err(ValidationError::DirectoryNeedsCardFormat)
        }
        _ => {}
    }
    if request.output.exists() && !request.output.is_dir() && !request.overwrite {
        return Err(ValidationError::OutputExists(request.output.clone()));
    }

    let mut transforms = request.transforms;
    if let Some(index) = request.intl_prefix {
        let rule = country::rule(index).ok_or(ValidationError::UnknownCountryRule(index))?;
        transforms.intl_phone_prefix = Some(*rule);
    }
    Ok(transforms)
}

/// Read any supported input into a fresh list.
pub fn read_input(
    path: &Path,
    config: &Config,
) -> Result<(ContactList, FormatKind, Vec<RecordError>), PipelineError> {
    let failed = |source, errors| PipelineError {
        action: "read",
        path: path.to_path_buf(),
        source,
        errors,
    };
    let kind = detect_kind(path).map_err(|err| failed(err, Vec::new()))?;
    let mut codec = create_codec(kind, config.card_options(VersionPolicy::AsDetected));
    let mut list = ContactList::new();
    if let Err(err) = codec.import_records(path, &mut list, false) {
        return Err(failed(err, codec.errors().to_vec()));
    }
    info!(records = list.len(), kind = kind.label(), "input read");
    Ok((list, kind, codec.errors().to_vec()))
}

fn output_kind(request: &ConvertRequest, input_kind: FormatKind) -> FormatKind {
    let directory = match request.shape {
        OutputShape::SingleFile => false,
        OutputShape::Directory => true,
        OutputShape::AsInput => {
            request.format == FormatToken::Dir
                || (input_kind == FormatKind::Directory
                    && (request.format.is_card() || request.format == FormatToken::Copy))
        }
    };
    if directory {
        return FormatKind::Directory;
    }
    match request.format {
        FormatToken::Backup => FormatKind::Backup,
        FormatToken::Copy if input_kind == FormatKind::Backup => FormatKind::Backup,
        _ => FormatKind::Vcf,
    }
}

pub fn convert(request: &ConvertRequest, config: &Config) -> Result<ConvertReport> {
    let transforms = validate(request)?;

    let (mut list, input_kind, read_errors) = read_input(&request.input, config)?;
    if !transforms.is_empty() {
        transforms.apply(&mut list);
        list.calculate_fields();
    }

    let output_kind = output_kind(request, input_kind);
    let options = config.card_options(request.format.version_policy());
    let mut codec = create_codec(output_kind, options);
    if let Err(source) = codec.export_records(&request.output, &list) {
        let mut errors = read_errors;
        errors.extend_from_slice(codec.errors());
        return Err(PipelineError {
            action: "write",
            path: request.output.clone(),
            source,
            errors,
        }
        .into());
    }
    info!(records = list.len(), kind = output_kind.label(), "output written");

    Ok(ConvertReport {
        records: list.len(),
        input_kind,
        output_kind,
        read_errors,
        write_errors: codec.errors().to_vec(),
    })
}

/// Statistics of one input.
pub fn info(path: &Path, config: &Config) -> Result<(Statistics, Vec<RecordError>)> {
    let (list, _, errors) = read_input(path, config)?;
    Ok((list.statistics(), errors))
}

/// Two lists after pairing.
#[derive(Debug, Clone)]
pub struct CompareReport {
    pub left: ContactList,
    pub right: ContactList,
    pub errors: Vec<RecordError>,
}

impl CompareReport {
    pub fn identical(&self) -> usize {
        self.left
            .iter()
            .filter(|c| c.pair_state == PairState::Identical)
            .count()
    }

    pub fn similar(&self) -> usize {
        self.left
            .iter()
            .filter(|c| matches!(c.pair_state, PairState::Similar(_)))
            .count()
    }

    pub fn unpaired_right(&self) -> usize {
        self.right
            .iter()
            .filter(|c| c.pair_state == PairState::NotFound)
            .count()
    }
}

impl fmt::Display for CompareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in self.left.iter() {
            let pair = item.pair_index.and_then(|j| self.right.get(j));
            match (item.pair_state, pair) {
                (PairState::Identical, Some(p)) => {
                    writeln!(f, "= {} | {}", item.visible_name, p.visible_name)?
                }
                (PairState::Similar(level), Some(p)) => writeln!(
                    f,
                    "~{} {} | {}",
                    level.priority(),
                    item.visible_name,
                    p.visible_name
                )?,
                _ => writeln!(f, "< {}", item.visible_name)?,
            }
        }
        for item in self.right.iter() {
            if item.pair_state == PairState::NotFound {
                writeln!(f, "> {}", item.visible_name)?;
            }
        }
        write!(
            f,
            "{} identical, {} similar, {} only left, {} only right",
            self.identical(),
            self.similar(),
            self.left.len() - self.identical() - self.similar(),
            self.unpaired_right()
        )
    }
}

pub fn compare(left: &Path, right: &Path, config: &Config) -> Result<CompareReport> {
    let opts = config.match_options()?;
    let (mut left, _, mut errors) = read_input(left, config)?;
    let (mut right, _, right_errors) = read_input(right, config).map_err(|mut err| {
        err.errors.splice(0..0, errors.iter().cloned());
        err
    })?;
    errors.extend(right_errors);
    compare_with(&mut left, &mut right, &opts);
    Ok(CompareReport {
        left,
        right,
        errors,
    })
}
