pub mod logging;
pub mod recv;
pub mod settings;

pub use logging::LoggingError;
pub use recv::RecvError;
pub use settings::SettingsError;
