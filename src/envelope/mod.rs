//! Конверт сообщения и его сериализация.
//!
//! - `envelope`: структура конверта и конструкторы для обычных сообщений,
//!   запросов и ответов.
//! - `codec`: каноническая JSON-форма конверта.

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode};
pub use envelope::*;
