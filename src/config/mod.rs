pub mod settings;

pub use settings::{ReplyPolicy, Settings};
