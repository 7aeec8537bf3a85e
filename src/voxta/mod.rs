//! Voxta platform interop: wire schema and the bidirectional CCv3 mapper.

pub mod mapper;
pub mod schema;

pub use mapper::{ccv3_lorebook_to_voxta_book, ccv3_to_voxta, voxta_to_ccv3};
pub use schema::{VoxtaBook, VoxtaBookItem, VoxtaCharacter, VoxtaPackage, VoxtaScenario, VoxtaScenarioRole};

/// Key under `extensions` where Voxta-only fields are packed on CCv3 cards.
pub const VOXTA_EXTENSION_KEY: &str = "voxta";
