//! SOCKS5 module for Sockbridge
//!
//! This module implements the client side of the SOCKS5 protocol used to
//! open tunnels through the upstream proxy. Destination hostnames are always
//! sent unresolved so the upstream performs DNS resolution.

mod auth;
mod command;
mod consts;
mod handshake;
mod types;

pub use auth::{authenticate_password, build_password_request, negotiate_method, AuthMethod};
pub use command::{build_connect_request, read_connect_reply, send_connect};
pub use consts::*;
pub use handshake::SocksHandshake;
pub use types::{BoundAddr, Destination};
