//! ptmux: the control plane of a client/server terminal multiplexer.
//!
//! The server owns the layout and key tables and listens on a Unix domain
//! socket; clients attach over it, pass their terminal descriptor with
//! `SCM_RIGHTS`, and exchange length-prefixed frames. The crate is split
//! into the transport layer ([`transport`]), the wire protocol
//! ([`protocol`]), key/binding vocabulary ([`keys`], [`bindings`],
//! [`command`]) and the two endpoints ([`server`], [`client`]).

#[cfg(not(unix))]
compile_error!("ptmux requires a Unix platform for descriptor passing");

pub mod bindings;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{ProtocolError, Severity};
