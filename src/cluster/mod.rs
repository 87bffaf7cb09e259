//! Cluster State
//!
//! The pieces of shared cluster state the recovery coordinator reads:
//! - Server ids and recovery ids
//! - Cluster view: membership, services, read bandwidth, busy markers
//! - Tablet directory
//!
//! Both the view and the directory are shared with other coordinator
//! activity and use interior locking held for one call at a time.

mod ids;
mod tablet_map;
mod view;

pub use ids::{RecoveryId, ServerId};
pub use tablet_map::{Tablet, TabletMap, TabletStatus};
pub use view::{
    ClusterView, ServerAssignment, ServerChangeEvent, ServerDetails, ServerStatus, Service,
    ServiceMask,
};
