//! Address-book conversion between vCard text, vCard directories and binary
//! phone backups, with record transformations and pairing of two books.

pub mod compare;
pub mod config;
pub mod contact;
pub mod convert;
pub mod country;
pub mod error;
pub mod format;
pub mod stats;
pub mod transform;
pub mod typed;
pub mod vdir;

pub use config::Config;
pub use contact::{ContactItem, ContactList};
pub use error::{CodecError, ValidationError};
