//! Sheetsmith Core - Foundational types for the sprite pipeline
//!
//! - `SheetsmithError` / `Result` - the error kinds every pipeline stage reports
//! - `ContentHash` - SHA-256 digests recorded for produced sheets

mod error;
mod hash;

pub use error::{Result, SheetsmithError};
pub use hash::ContentHash;
