pub mod error;
pub mod model;
pub mod detect;
pub mod macros;
pub mod png_codec;
pub mod voxta;
pub mod archive;
pub mod graph;
pub mod caps;
pub mod import;

pub use error::{DetectError, EngineError, Result, Warning};
pub use detect::{detect, FormatKind};
pub use model::{Card, CardPayload, CharacterData, SpecKind};
pub use graph::AssetGraph;
pub use import::{export_card, import_package, ExportFormat, ImportOptions, ImportOutcome};
