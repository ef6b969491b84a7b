//! vxwhatsapp: a WhatsApp transport for a message bus.
//!
//! Bridges bus messages to a WhatsApp protocol client running on its own
//! thread: correlates protocol ids with bus ids to report acks and delivery,
//! deduplicates receipts and status changes, and owns the client's lifecycle.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod correlation;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod status;
pub mod transport;
pub mod whatsapp;
