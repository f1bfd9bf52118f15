/// Logging initialization.
pub mod logging;
