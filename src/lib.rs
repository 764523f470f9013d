//! Sidecar P2P daemon for an Ethereum consensus-layer client.
//!
//! The daemon is spawned as a child process by a beacon node and exposes the
//! consensus networking stack over a framed stdio protocol:
//!
//! - **Port** for length-prefixed protobuf commands and notifications
//! - **Request/response** over raw libp2p streams (per-protocol handlers)
//! - **Gossipsub** with Ethereum consensus parameters, peer scoring and a
//!   host-in-the-loop message validation bridge
//! - **discv5** peer discovery with ENR management and fork-digest filtering

pub mod config;
pub mod daemon;
pub mod discovery;
pub mod gossip;
pub mod keys;
pub mod node;
pub mod port;
pub mod proto;
pub mod reqresp;
