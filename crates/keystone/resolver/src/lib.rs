//! Keystone Resolver - serves account credentials to the message bus
//!
//! NATS servers running in resolver mode ask for an account's credential on
//! `$SYS.REQ.ACCOUNT.<identity>.CLAIMS.LOOKUP` and listen for changed
//! credentials on `$SYS.REQ.CLAIMS.UPDATE`. This crate provides:
//!
//! - [`CredentialIndex`]: concurrent identity to credential map
//! - [`BusTransport`]: publish/subscribe/request seam, with [`NatsBus`]
//!   and [`InMemoryBus`] implementations
//! - [`ResolverService`]: lookup responder and announce path

#![deny(unsafe_code)]

pub mod error;
pub mod index;
pub mod memory;
pub mod nats;
pub mod service;
pub mod transport;

pub use error::{ResolverError, ResolverResult};
pub use index::CredentialIndex;
pub use memory::InMemoryBus;
pub use nats::NatsBus;
pub use service::{ResolverConfig, ResolverService, ResolverStatsSnapshot};
pub use transport::{extract_wildcard, subject_matches, BusMessage, BusSubscription, BusTransport};
