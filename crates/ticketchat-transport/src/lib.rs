//! # ticketchat-transport
//!
//! Ticket-scoped socket transport with supervised reconnection.
//!
//! - [`socket`]: the [`Connector`]/[`SocketHandle`] seam and the
//!   `tokio-tungstenite` backed [`WsConnector`]
//! - [`supervisor`]: the pure [`ReconnectSupervisor`] state machine
//! - [`link`]: [`SupervisedLink`], which runs the supervisor against real
//!   sockets and timers

#![deny(unsafe_code)]

pub mod link;
pub mod socket;
pub mod supervisor;

pub use link::{LinkEvent, SupervisedLink};
pub use socket::{Connector, SocketEvent, SocketEventKind, SocketHandle, WsConnector};
pub use supervisor::{Directive, ReconnectSupervisor, SupervisorInput, SupervisorReport};
