use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use deunicode::deunicode;
use sha1::{Digest, Sha1};

use crate::contact::{ContactItem, EMPTY_CONTACT_NAME};

const MAX_STEM_LEN: usize = 64;

/// Every `*.vcf` below `root`, recursively, in sorted order.
pub fn list_vcf_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_vcf(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_vcf(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_vcf(&path, files)?;
        } else if is_vcf(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_vcf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("vcf"))
}

/// Remove every `*.vcf` below `dir` that is not in `keep`. Paths are
/// compared case-insensitively, like the stems in [`select_stem`].
/// Returns how many went.
pub fn remove_stale(dir: &Path, keep: &[PathBuf]) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let keep: HashSet<String> = keep.iter().map(|p| lower_path(p)).collect();
    let mut removed = 0;
    for path in list_vcf_files(dir)? {
        if keep.contains(&lower_path(&path)) {
            continue;
        }
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        removed += 1;
    }
    Ok(removed)
}

fn lower_path(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// ASCII file stem: transliterated, `[A-Za-z0-9_-]` only.
pub fn sanitize_stem(text: &str) -> String {
    let mut out = String::new();
    for c in deunicode(text).chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else if c.is_whitespace() || c == '.' {
            '_'
        } else {
            continue;
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
        if out.len() >= MAX_STEM_LEN {
            break;
        }
    }
    out.trim_matches(['_', '-']).to_string()
}

pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Deterministic, collision-free stem for one record. `used` holds the
/// lower-cased stems already taken in this run.
pub fn select_stem(item: &ContactItem, card: &[u8], used: &mut HashSet<String>) -> String {
    let mut base = sanitize_stem(&item.id);
    if base.is_empty() {
        let name = item.make_generic_name();
        if name != EMPTY_CONTACT_NAME {
            base = sanitize_stem(&name);
        }
    }

    if base.is_empty() {
        let hex = sha1_hex(card);
        for len in [12_usize, 16, 20, 24, 28, 32, 40] {
            let candidate = &hex[..len];
            if used.insert(candidate.to_ascii_lowercase()) {
                return candidate.to_string();
            }
        }
        base = hex;
    } else if used.insert(base.to_ascii_lowercase()) {
        return base;
    }

    let mut counter = 2u32;
    loop {
        let candidate = format!("{base}-{counter}");
        if used.insert(candidate.to_ascii_lowercase()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Write through a temporary sibling file and rename into place.
pub fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => return Err(anyhow!("target path has no parent: {}", target.display())),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent dir {}", parent.display()))?;

    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("abconv");
    let mut counter: u32 = 0;
    let temp_path = loop {
        let candidate = if counter == 0 {
            parent.join(format!(".{name}.tmp"))
        } else {
            parent.join(format!(".{name}.{counter}.tmp"))
        };
        if !candidate.exists() {
            break candidate;
        }
        counter += 1;
    };

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| {
                format!(
                    "failed to create temporary file {} for atomic write",
                    temp_path.display()
                )
            })?;
        file.write_all(data)
            .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync temporary file {}", temp_path.display()))?;
    }

    fs::rename(&temp_path, target).with_context(|| {
        format!(
            "failed to rename temporary file {} to {}",
            temp_path.display(),
            target.display()
        )
    })?;

    Ok(())
}
