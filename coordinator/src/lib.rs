pub mod dispatch;
pub mod registry;
pub mod settings;
pub mod workers;
