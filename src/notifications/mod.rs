//! # Push Notifications
//!
//! Job owners receive every state change over a per-subject push channel; operators
//! subscribe to a separate broadcast channel for escalations.

pub mod events;
pub mod hub;
pub mod registry;

pub use events::{NoticeSeverity, NotificationEvent, OperatorNotice, PushMessage};
pub use hub::{
    HeartbeatReport, HubError, HubResult, NotificationHub, PushConnection, SubjectVerifier,
};
pub use registry::{ConnectionHandle, ConnectionRegistry, DashMapConnectionRegistry};
