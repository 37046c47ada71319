//! Roast profile decoding and phase reconstruction
//!
//! A profile is the desktop roaster's `.alog` document: a key/value map
//! holding the curves (`timex`, `temp1`, `temp2`), the event index and a
//! `computed` map of phase metrics. Profiles arrive as stored blobs, legacy
//! files on disk, or are rebuilt from the roast's own telemetry columns.

pub mod decoder;
pub mod phases;
pub mod pylit;
pub mod resolver;
pub mod store;

use serde_json::{Map, Value};
use thiserror::Error;

pub use decoder::{decode_profile, ProfileDecoder};
pub use resolver::{resolve, ProfileSource, ResolvedProfile};

/// Parsed profile document
pub type Document = Map<String, Value>;

/// Failure to turn profile bytes into a [`Document`]
///
/// Never surfaces to API callers; the resolver logs it and falls through
/// to the next source.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive contains no members")]
    EmptyArchive,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Literal syntax error at offset {offset}: {message}")]
    Literal { offset: usize, message: String },

    #[error("Profile root is not a key/value map")]
    NotAnObject,

    #[error("No decoder recognised the profile")]
    Unrecognized,
}
