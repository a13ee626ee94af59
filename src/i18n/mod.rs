//! Supported languages.
//!
//! - `registry`: the fixed table of target languages
//! - `language`: validated `Language` type used as a map key throughout

mod language;
mod registry;

pub use language::Language;
pub use registry::{LanguageConfig, LanguageRegistry};
