//! Settings struct grouping per-component configuration sections.
//!
//! Each section maps to one engine component and can be updated
//! independently; missing sections deserialize to their defaults.

use serde::{Deserialize, Serialize};

use crate::sync::{DetectorConfig, EstimatorConfig, MatcherConfig};

/// Root settings structure for a synchronization session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Pulse detection settings.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Pulse-train matching settings.
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Warp estimation and confidence settings.
    #[serde(default)]
    pub estimator: EstimatorConfig,
}
