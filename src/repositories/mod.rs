//! # Repository Layer
//!
//! Repositories wrap SeaORM operations for triggers, their cursors and their
//! events. Conditional updates use `update_many` filtered on the value the
//! caller observed, so a stale writer changes nothing.

pub mod connection;
pub mod trigger;
pub mod trigger_event;

pub use connection::ConnectionRepository;
pub use trigger::TriggerRepository;
pub use trigger_event::{NewTriggerEvent, TriggerEventRepository};
