//! Remote address books, reached through a blocking transport.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info};

use super::vcard::{self, CardOptions};
use super::{Codec, Diagnostics};
use crate::contact::ContactList;
use crate::error::CodecError;
use crate::vdir;

/// A card fetched from a remote collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCard {
    /// Path of the resource on the server
    pub href: String,
    /// Entity tag for change detection
    pub etag: Option<String>,
    pub data: String,
}

/// Transport to an address-book server. Calls block until the whole
/// response is available.
pub trait RemoteBook {
    /// Every resource in `collection`, with its card data.
    fn list_cards(&self, collection: &str) -> Result<Vec<RemoteCard>>;

    /// Store `data` under `href`, returning the href the server assigned.
    fn put_card(&mut self, collection: &str, href: &str, data: &str) -> Result<String>;
}

pub struct RemoteFormat {
    book: Box<dyn RemoteBook + Send>,
    options: CardOptions,
    diag: Diagnostics,
}

impl RemoteFormat {
    pub fn new(book: Box<dyn RemoteBook + Send>, options: CardOptions) -> Self {
        Self {
            book,
            options,
            diag: Diagnostics::default(),
        }
    }
}

fn collection_of(source: &Path) -> String {
    source.to_string_lossy().into_owned()
}

impl Codec for RemoteFormat {
    fn detect(path: &Path) -> bool {
        let text = path.to_string_lossy();
        ["http://", "https://", "dav://", "davs://"]
            .iter()
            .any(|scheme| text.starts_with(scheme))
    }

    fn import_records(
        &mut self,
        source: &Path,
        list: &mut ContactList,
        append: bool,
    ) -> Result<(), CodecError> {
        self.diag.clear();
        let collection = collection_of(source);
        let cards = self
            .book
            .list_cards(&collection)
            .map_err(|err| self.diag.fatal(format!("{collection}: {err:#}")))?;
        if !append {
            list.clear();
        }

        for card in &cards {
            if !card.href.to_ascii_lowercase().ends_with(".vcf") {
                self.diag
                    .record(None, format!("Strange vCard item: {}", card.href));
                continue;
            }
            let mut card_diag = Diagnostics::default();
            let items = vcard::parse_cards(&card.data, &mut card_diag);
            debug!(href = %card.href, records = items.len(), "remote card parsed");
            self.diag.absorb(card_diag, &format!("{}: ", card.href));
            list.items.extend(items);
        }
        info!(resources = cards.len(), records = list.len(), %collection, "remote address book read");
        Ok(())
    }

    fn export_records(&mut self, dest: &Path, list: &ContactList) -> Result<(), CodecError> {
        self.diag.clear();
        let collection = collection_of(dest);
        let mut used = HashSet::new();
        for item in list.iter() {
            let card = vcard::write_card(item, self.options.version_for(item), &self.options);
            let href = format!("{}.vcf", vdir::select_stem(item, card.as_bytes(), &mut used));
            let stored = self
                .book
                .put_card(&collection, &href, &card)
                .map_err(|err| self.diag.fatal(format!("{collection}/{href}: {err:#}")))?;
            debug!(%href, %stored, "remote card stored");
        }
        info!(records = list.len(), %collection, "remote address book written");
        Ok(())
    }

    fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }
}
