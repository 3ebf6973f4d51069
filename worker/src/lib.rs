pub mod runtime;
pub mod settings;
