//! # TSS Core
//!
//! Coordination client for a threshold ECDSA (t-of-n MPC) custody cluster.
//!
//! A wallet backend never holds a private key. Instead it asks the cluster to
//! run a ceremony and waits for the outcome:
//! - Key generation: returns an opaque key share and the wallet address
//! - Signing: returns a DER signature, converted here into a canonical
//!   `(r, s, recovery_id)` signature usable on chain
//!
//! ## Ceremony flow
//!
//! 1. The [`Coordinator`] sends an [`ActionRequest`] through a
//!    [`cluster::ControlPlane`]; the call only acknowledges the trigger.
//! 2. The result arrives out of band on a session-scoped broker channel
//!    (`keygen:<session>` or `sign:<session>`), read by the [`listener`].
//! 3. Signing results go through [`signature::to_canonical_signature`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{Coordinator, CoordinatorConfig, SessionId};
//!
//! let coordinator = Coordinator::new(control_plane, broker, CoordinatorConfig::default())?;
//!
//! let wallet = coordinator.create_wallet(&SessionId::for_user("alice", 1)?).await?;
//! let signature = coordinator
//!     .sign(&SessionId::for_user("alice", 2)?, wallet.share(), &hash, wallet.address())
//!     .await?;
//! ```

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod signature;
pub mod types;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use signature::CanonicalSignature;
pub use types::{
    Action, ActionRequest, ChannelKey, KeyMaterial, PartyId, Purpose, RawSignature, Session,
    SessionId,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-party setup
pub const DEFAULT_THRESHOLD: u32 = 2;

/// Default party set
pub const DEFAULT_PARTIES: [PartyId; 3] = [1, 2, 3];
