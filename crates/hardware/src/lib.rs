//! Adapters between the controller and the kiosk's local hardware service.
//!
//! - [`LocalApiGateway`] — request/response commands over HTTP
//! - [`EventFeed`] — asynchronous notifications over WebSocket
//! - [`protocol`] — motor codes, endpoints and feed message decoding

pub mod event_feed;
pub mod local_api;
pub mod protocol;

pub use event_feed::{EventFeed, FeedSignal};
pub use local_api::LocalApiGateway;
