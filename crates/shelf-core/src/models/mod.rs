//! Data models for the shelf engine.
//!
//! `Book` is the catalog record persisted in each shelf's remote catalog;
//! `Shelf` names where that catalog and its release assets live.

mod book;
mod shelf;

pub use book::*;
pub use shelf::*;
