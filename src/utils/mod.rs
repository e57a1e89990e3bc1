pub mod cross_language;

pub use cross_language::generate_naming_variants;
