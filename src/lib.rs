pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod model;
pub mod negotiation;
pub mod signaling;
pub mod transport;
pub mod traversal;
pub mod util;
