//! # ticketchat-session
//!
//! The per-ticket chat session and the pieces it coordinates:
//!
//! - [`reconciler`]: pure merge of inbound batches into an ordered,
//!   de-duplicated [`MessageLog`]
//! - [`dispatcher`]: notification and scroll decisions for accepted messages
//! - [`directory`]: display-name cache shared across sessions
//! - [`collaborators`]: history and user lookup traits plus the REST client
//! - [`session`]: [`ChatSession`], which owns the log and the connection

#![deny(unsafe_code)]

pub mod collaborators;
pub mod directory;
pub mod dispatcher;
pub mod reconciler;
pub mod session;

pub use collaborators::{FetchError, HistoryFetcher, HttpApi, TicketHistory, TicketMeta, UserResolver};
pub use directory::UserDirectory;
pub use dispatcher::{
    DispatchReport, NoopNotifier, NoopScroll, Notification, Notifier, ScrollSink,
    SideEffectDispatcher, StaticVisibility, VisibilitySignal,
};
pub use reconciler::{MergeOutcome, MessageLog, merge};
pub use session::{ChatSession, SessionConfig, SessionDeps, SessionEvent};
