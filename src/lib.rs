// Console session core - library root

pub mod auth;
pub mod authenticator;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod navigator;

pub use error::{RefreshFailure, SessionError};
pub use http_client::{ClientSettings, SessionClient};
