//! Workdeck real-time engine library.
//!
//! Exposes the server, the [`hub::Hub`] and its services for use in tests
//! and embedding. Clients hold one WebSocket each; the hub tracks their
//! rooms, runs the chat pipeline and routes notifications to online users
//! or queues them for offline ones.

pub mod config;
pub mod hub;
pub mod identity;
pub mod mentions;
pub mod notify;
pub mod offline;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod store;
