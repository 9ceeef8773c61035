//! Корреляция запросов и ответов.
//!
//! Ответ приходит в общий канал без встроенной корреляции; сопоставление с
//! исходным вызывающим выполняется по id корреляции:
//!
//! ```text
//! send_timed_request:
//!   1. Correlator::register  -> запись в таблице + задача-таймер
//!   2. publish(request)      -> ошибка публикации снимает запись
//!   3. PendingReply.await
//!
//! входящий ответ:   Correlator::resolve -> снимает запись, гасит таймер
//! дедлайн:          таймер               -> снимает запись, RequestError::Timeout
//! drop(PendingReply): Correlator::cancel -> снимает запись, гасит таймер
//! ```
//!
//! Снятие записи из `DashMap` является единственной точкой разрешения, поэтому
//! каждая запись разрешается ровно один раз.

pub mod engine;
pub mod pending;

pub use engine::Correlator;
pub use pending::PendingReply;
