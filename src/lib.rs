//! Client for the eBay APIs.
//!
//! A [`Connection`] builds a call from its verb and payload, authenticates it
//! with an application token from a shared [`TokenManager`], sends it and
//! normalizes the XML or JSON reply into a [`Response`].

pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub mod parallel;
pub mod request;
pub mod response;
pub mod token;
pub mod xml;

pub use config::{ConnectionConfig, Credentials};
pub use connection::{CallState, Connection};
pub use error::{Error, Result};
pub use hooks::{DefaultHooks, HookRegistry, VerbHooks, XmlHooks};
pub use parallel::{Parallel, batch_error};
pub use request::{Attachment, Call, RequestContext};
pub use response::{BodyErrors, Parsed, Response};
pub use token::{Token, TokenManager};
