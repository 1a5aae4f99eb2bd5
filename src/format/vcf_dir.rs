//! Directory codec: one vCard file per record.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::vcard::{self, CardOptions};
use super::vcf::decode_text;
use super::{Codec, Diagnostics};
use crate::contact::ContactList;
use crate::error::CodecError;
use crate::vdir;

#[derive(Debug, Default)]
pub struct VcfDirFormat {
    options: CardOptions,
    diag: Diagnostics,
}

impl VcfDirFormat {
    pub fn new(options: CardOptions) -> Self {
        Self {
            options,
            diag: Diagnostics::default(),
        }
    }
}

impl Codec for VcfDirFormat {
    fn detect(path: &Path) -> bool {
        path.is_dir()
    }

    fn import_records(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError> {
        self.diag.clear();
        if !append {
            list.clear();
        }
        let files = vdir::list_vcf_files(source).map_err(|err| {
            self.diag
                .fatal(format!("Can't read directory {}: {err:#}", source.display()))
        })?;

        for path in &files {
            let name = path
                .strip_prefix(source)
                .unwrap_or(path)
                .display()
                .to_string();
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.diag.record(None, format!("{name}: can't read file: {err}"));
                    continue;
                }
            };
            let mut file_diag = Diagnostics::default();
            let text = decode_text(bytes, &mut file_diag);
            let items = vcard::parse_cards(&text, &mut file_diag);
            debug!(file = %name, records = items.len(), "card file read");
            self.diag.absorb(file_diag, &format!("{name}: "));
            list.items.extend(items);
        }
        info!(files = files.len(), records = list.len(), path = %source.display(), "vCard directory read");
        Ok(())
    }

    fn export_records(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError> {
        self.diag.clear();
        fs::create_dir_all(dest).map_err(|err| {
            self.diag
                .fatal(format!("Can't create directory {}: {err}", dest.display()))
        })?;

        let mut used = HashSet::new();
        let mut written = Vec::with_capacity(list.len());
        for item in list.iter() {
            let card = vcard::write_card(item, self.options.version_for(item), &self.options);
            let stem = vdir::select_stem(item, card.as_bytes(), &mut used);
            let target = dest.join(format!("{stem}.vcf"));
            vdir::write_atomic(&target, card.as_bytes()).map_err(|err| {
                self.diag
                    .fatal(format!("Can't write file {}: {err:#}", target.display()))
            })?;
            written.push(target);
        }

        // Only once every record is on disk, so a failed export loses nothing.
        let removed = vdir::remove_stale(dest, &written).map_err(|err| {
            self.diag
                .fatal(format!("Can't clean directory {}: {err:#}", dest.display()))
        })?;
        if removed > 0 {
            debug!(removed, path = %dest.display(), "stale card files removed");
        }
        info!(records = list.len(), path = %dest.display(), "vCard directory written");
        Ok(())
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactItem;

    fn card(id: &str, name: &str) -> ContactItem {
        let mut item = ContactItem {
            id: id.into(),
            full_name: name.into(),
            original_format: vcard::ORIGINAL_FORMAT.into(),
            version: "3.0".into(),
            ..Default::default()
        };
        item.calculate_fields();
        item
    }

    #[test]
    fn writes_one_file_per_record_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("book");
        let list = ContactList::from(vec![
            card("", "Jane Doe"),
            card("", "Jane Doe"),
            card("uid-0001", "Other"),
        ]);

        let mut codec = VcfDirFormat::default();
        codec.export_records(&out, &list).unwrap();
        let mut names: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["Jane_Doe-2.vcf", "Jane_Doe.vcf", "uid-0001.vcf"]);

        let mut back = ContactList::new();
        codec.import_records(&out, &mut back, false).unwrap();
        assert_eq!(back.len(), 3);
        assert!(codec.errors().is_empty());
        assert_eq!(back.find_by_id("uid-0001"), Some(2));
    }

    #[test]
    fn export_replaces_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.vcf"), "BEGIN:VCARD\nEND:VCARD\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/older.vcf"), "BEGIN:VCARD\nEND:VCARD\n").unwrap();
        fs::write(dir.path().join("Solo.vcf"), "stale content").unwrap();
        let mut codec = VcfDirFormat::default();
        codec
            .export_records(dir.path(), &ContactList::from(vec![card("", "Solo")]))
            .unwrap();
        assert!(!dir.path().join("old.vcf").exists());
        assert!(!dir.path().join("nested/older.vcf").exists());
        assert!(fs::read_to_string(dir.path().join("Solo.vcf"))
            .unwrap()
            .contains("FN:Solo"));

        let mut back = ContactList::new();
        codec.import_records(dir.path(), &mut back, false).unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn failed_export_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.vcf"), "BEGIN:VCARD\nFN:Old\nEND:VCARD\n").unwrap();
        // a directory squatting on the target name makes the write fail
        fs::create_dir(dir.path().join("Solo.vcf")).unwrap();
        let mut codec = VcfDirFormat::default();
        assert!(codec
            .export_records(dir.path(), &ContactList::from(vec![card("", "Solo")]))
            .is_err());
        assert!(dir.path().join("old.vcf").exists());
    }

    #[test]
    fn per_file_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.vcf"), "BEGIN:VCARD\nVERSION:3.0\nFN:A\nX-FOO:1\nEND:VCARD\n")
            .unwrap();
        let mut codec = VcfDirFormat::default();
        let mut list = ContactList::new();
        codec.import_records(dir.path(), &mut list, false).unwrap();
        let errors: Vec<String> = codec.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(errors, ["line 1: a.vcf: 1 unknown tags found"]);
    }

    #[test]
    fn unreadable_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = VcfDirFormat::default();
        let mut list = ContactList::new();
        assert!(codec
            .import_records(&dir.path().join("missing"), &mut list, false)
            .is_err());
        assert!(codec.fatal_error().is_some());
    }
}
