//! Durable interaction store and database-backed event bus.
//!
//! Supports Postgres and SQLite through `sqlx`'s `Any` driver, with a single
//! retry policy shared by both components.

pub mod event_bus;
pub mod interaction_store;
pub mod models;
pub mod retry;
pub mod schema;

pub use event_bus::EventBus;
pub use interaction_store::InteractionStore;
pub use retry::RetryPolicy;
pub use schema::BackendKind;
