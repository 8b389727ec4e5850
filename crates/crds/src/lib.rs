//! CAPC CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Contabo Cluster API
//! infrastructure provider, plus the slices of Cluster API objects the
//! provider reads.

pub mod capi;
pub mod conditions;
pub mod contabo_cluster;
pub mod contabo_machine;
pub mod error;
pub mod references;

pub use capi::*;
pub use conditions::{Condition, ConditionStatus};
pub use contabo_cluster::*;
pub use contabo_machine::*;
pub use error::CrdError;
pub use references::*;
