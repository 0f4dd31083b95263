//! Active/Passive role management for a pair of redundant BMCs.
//!
//! Each controller runs a [`Manager`]. It publishes this controller's
//! redundancy interface and a periodic heartbeat, tracks the sibling through
//! the Sibling interface on the local bus, decides once at startup whether to
//! be Active or Passive, and starts the matching systemd target.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod manager;
mod relay;
mod retry;
mod role;
mod role_handler;
mod supervisor;

pub mod role_determination;
pub mod sibling;

pub use error::{Error, Result};
pub use manager::{Manager, ManagerConfig, ManagerState};
pub use relay::{RelayConfig, SiblingRelay};
pub use retry::RetryPolicy;
pub use role::{BmcState, Role};
pub use role_determination::{ErrorCase, Input, RoleInfo};
pub use role_handler::{ACTIVE_TARGET, PASSIVE_TARGET, RoleHandler};
pub use sibling::{BusSibling, Sibling, SiblingConfig};
pub use supervisor::Supervisor;
