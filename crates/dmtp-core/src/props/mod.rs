//! Protocol properties: the typed key/value registry the server can read
//! and write, and that parametrizes transmission limits, GPS sampling and
//! motion reporting.

pub mod keys;
pub mod store;
pub mod value;

pub use keys::*;
pub use store::{AuxStore, AuxStoreError, CommandHandler, KeyValue, PropError, PropertyStore};
pub use value::{PropType, PropValue};
