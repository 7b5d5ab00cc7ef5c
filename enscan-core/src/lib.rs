//! # enscan-core — capture and correlation engine for Exposure Notification beacons
//!
//! This library decodes, stores, and cross-correlates Bluetooth LE
//! advertisements carrying the Google/Apple Exposure Notification (G+A
//! "EN") service data (0xFD6F). Devices using this protocol rotate their
//! advertising address and Rolling Proximity Identifier roughly every fifteen
//! minutes; this crate's job is to recognise that a newly-seen identity is
//! the same physical device reappearing, either because an operator supplied
//! its Identity Resolving Key ([`rpa`]) or by heuristic ([`tracker`]).
//!
//! The following functionality is provided:
//!
//! * decoding and encoding of [`EnGa`](packet::EnGa) records and their CSV wire format ([`codec`])
//! * Resolvable Private Address resolution against an IRK ([`rpa`])
//! * an arena-indexed per-device packet store ([`stream`])
//! * derived per-Stream metrics ([`metrics`])
//! * the cross-Stream merge engine ([`tracker`])
//! * operator-supplied identity bondings ([`bonding`])
//! * a reporter that enumerates distinct identities seen ([`reporter`])
//! * CSV persistence of a capture ([`persistence`])
//! * a raw `AF_BLUETOOTH`/`BTPROTO_HCI` transport on Linux ([`hci`])
//! * the [`Engine`](engine::Engine), which owns all of the above for one process
//!
//! This crate performs no D-Bus, GATT, or pairing operations: Exposure
//! Notification beacons are non-connectable broadcasts, read directly off
//! the HCI socket.

pub mod address;
pub mod bonding;
pub mod codec;
pub mod engine;
pub mod error;
pub mod hci;
pub mod metrics;
pub mod packet;
pub mod persistence;
pub mod reporter;
pub mod rpa;
pub mod stream;
pub mod tracker;

pub use address::{Address, AddressType};
pub use error::{Error, ErrorKind, Result};
pub use packet::{EnGa, Packet, PacketId, Timeval};
