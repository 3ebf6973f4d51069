#[cfg(feature = "codec")]
pub mod codec;

#[cfg(feature = "logger")]
pub mod logger;

pub mod process;
