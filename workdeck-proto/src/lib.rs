//! Shared protocol definitions for the Workdeck real-time wire format.

pub mod codec;
pub mod event;
pub mod message;
pub mod notification;
pub mod presence;
