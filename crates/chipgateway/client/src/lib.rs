//! Client engine for the ChipGateway remote smart card protocol
//!
//! A ChipGateway server drives a local smart card remotely: it asks the client to list the
//! tokens present on the machine, to read certificates from a token and to produce
//! signatures with a token's credentials. This crate implements the client side of that
//! exchange.
//!
//! ## Overview
//!
//! - [`ProtocolEngine`] runs one session: `HelloRequest`, `GetCommand`, any number of
//!   `ListTokens`/`ListCertificates`/`Sign` rounds and finally `Terminate`.
//! - [`transport::HttpTransport`] carries JSON messages over one reusable HTTP connection on
//!   top of a byte stream produced by a [`transport::Connector`].
//! - [`ChallengeValidator`] checks the server's signature over the random hello challenge.
//! - [`PinUnwrapper`] decrypts PINs the server sends end-to-end encrypted.
//! - [`CardService`] and [`UserInterface`] are the collaborators the engine delegates card
//!   access and user notices to.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;

pub mod card;
pub mod challenge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod jwe;
pub mod messages;
pub mod pin;
pub mod session;
pub mod transport;
pub mod ui;
pub mod update;

mod error;
mod worker;

pub use card::{CardError, CardService, TokenSearch};
pub use challenge::{Challenge, ChallengeValidator, TrustStore, TrustStoreError};
pub use config::GatewayConfig;
pub use engine::{EngineState, ProtocolEngine};
pub use error::{Error, ErrorKind, Result};
pub use messages::{Command, Reply, ResultCode, SlotHandle};
pub use pin::{Pin, PinKey, PinUnwrapper, RemotePinError};
pub use session::{Endpoint, ResultMinor, Session, SessionToken};
pub use transport::{Connector, HttpTransport, TcpConnector, Transport, TransportError};
pub use ui::{LogInterface, UserInterface};
pub use update::UpdatePolicy;

/// Version string announced to the server in the hello request.
pub fn client_version() -> String {
    format!(
        "{}.{}.{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH")
    )
}

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        CancellationToken, CardError, CardService, Command, Error, ErrorKind, GatewayConfig,
        ProtocolEngine, Reply, Result, ResultCode, Session, SessionToken, SlotHandle, TokenSearch,
        Transport, UserInterface, pin::Pin,
    };
}
