pub mod codec;
pub mod listener;
pub mod registration;
pub mod request;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use codec::*;
pub use listener::*;
pub use registration::*;
pub use request::*;
pub use transport::*;
