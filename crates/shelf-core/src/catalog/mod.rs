//! Shelf catalogs: the codec and the remote-backed manager.

pub mod codec;
mod manager;

pub use manager::{
    find, find_by_sha256, remove, remove_in_place, upsert, upsert_in_place, CatalogManager,
};
