pub mod animation;
pub mod error;
pub mod host;
pub mod import;
pub mod memory;
pub mod options;
pub mod realize;
pub mod source;
pub mod transform;
pub mod vtree;

pub use error::{GraphError, HostError, ImportError, RealizationError};
pub use import::{ImportReport, import_scene};
pub use options::ImportOptions;
