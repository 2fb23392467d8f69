//! Domain vocabulary shared by every pipeline stage.

pub mod error;
pub mod mode;
pub mod package;

pub use error::{FailureKind, PipelineError, Result};
pub use mode::Mode;
pub use package::{escape_package_name, is_scoped, unescape_package_name};
