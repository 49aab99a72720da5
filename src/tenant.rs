//! Tenant identity
//!
//! Every command, query, and persisted row is scoped to a tenant: an
//! isolated game shard identified by a UUID plus its region and client
//! version. The tenant travels in bus headers and is never read from
//! process-global state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bus header carrying the tenant UUID
pub const HEADER_TENANT_ID: &str = "TENANT_ID";
/// Bus header carrying the shard region
pub const HEADER_REGION: &str = "REGION";
/// Bus header carrying the client major version
pub const HEADER_MAJOR_VERSION: &str = "MAJOR_VERSION";
/// Bus header carrying the client minor version
pub const HEADER_MINOR_VERSION: &str = "MINOR_VERSION";
/// Bus header carrying the originating trace span
pub const HEADER_SPAN_ID: &str = "SPAN_ID";

/// An isolated game shard (region + version tuple)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub region: String,
    pub major_version: u16,
    pub minor_version: u16,
    /// Trace span carried in from the triggering message and mirrored
    /// onto everything emitted on its behalf
    pub span_id: Option<String>,
}

impl Tenant {
    pub fn new(id: Uuid, region: impl Into<String>, major_version: u16, minor_version: u16) -> Self {
        Self {
            id,
            region: region.into(),
            major_version,
            minor_version,
            span_id: None,
        }
    }

    pub fn with_span(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Tenant scope reconstructed from a persisted row, used by the sweep
    /// loops where no inbound headers exist. Region, version, and span are
    /// not persisted, so outbound headers carry empty defaults.
    pub fn from_id(id: Uuid) -> Self {
        Self {
            id,
            region: String::new(),
            major_version: 0,
            minor_version: 0,
            span_id: None,
        }
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} v{}.{})",
            self.id, self.region, self.major_version, self.minor_version
        )
    }
}
