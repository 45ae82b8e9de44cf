//! Per-node configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! failure_mode = "proceed_with_commit"
//! tracking_mode = "reconstruct"
//! handled_failure_kinds = ["entity.name-not-unique"]
//! abort_on = ["internal"]
//! max_resolution_passes = 8
//! keep_failures_after_rollback = false
//!
//! [property_mask]
//! exclude = ["width"]
//! ```

use crate::errors::{DocweaveError, ExErrorKind, Result};
use crate::model::FailureKind;
use crate::policy::{FailureProcessingMode, PropertyMask, TrackingMode};
use crate::reconciler::ReconcileOptions;
use crate::resolver::FailureResolver;
use crate::transaction::{TransactionManager, TransactionOptions};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComponentConfig {
    pub failure_mode: FailureProcessingMode,
    pub tracking_mode: TrackingMode,
    /// Failure kinds to auto-resolve first, in priority order
    pub handled_failure_kinds: Vec<FailureKind>,
    pub property_mask: PropertyMask,
    pub abort_on: Vec<ExErrorKind>,
    pub max_resolution_passes: u32,
    pub keep_failures_after_rollback: bool,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureProcessingMode::default(),
            tracking_mode: TrackingMode::default(),
            handled_failure_kinds: Vec::new(),
            property_mask: PropertyMask::default(),
            abort_on: Vec::new(),
            max_resolution_passes: TransactionOptions::default().max_resolution_passes,
            keep_failures_after_rollback: false,
        }
    }
}

impl ComponentConfig {
    /// Parse and validate TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML, unknown keys, or inconsistent
    /// values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ComponentConfig =
            toml::from_str(text).map_err(|e| DocweaveError::InvalidConfig {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// `InvalidConfig` when no resolution pass is allowed or a property is
    /// both allowed and excluded.
    pub fn validate(&self) -> Result<()> {
        if self.max_resolution_passes == 0 {
            return Err(DocweaveError::InvalidConfig {
                message: "max_resolution_passes must be at least 1".to_string(),
            });
        }
        if let Some(key) = self
            .property_mask
            .allow
            .iter()
            .find(|k| self.property_mask.exclude.contains(*k))
        {
            return Err(DocweaveError::InvalidConfig {
                message: format!("property '{}' is both allowed and excluded", key),
            });
        }
        Ok(())
    }

    pub fn resolver(&self) -> FailureResolver {
        FailureResolver::new(self.handled_failure_kinds.clone(), self.failure_mode)
    }

    pub fn transaction_manager(&self) -> TransactionManager {
        TransactionManager::new(
            self.resolver(),
            TransactionOptions {
                max_resolution_passes: self.max_resolution_passes,
                keep_failures_after_rollback: self.keep_failures_after_rollback,
            },
        )
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            tracking: self.tracking_mode,
            failure_mode: self.failure_mode,
            property_mask: self.property_mask.clone(),
            abort_on: self.abort_on.clone(),
        }
    }
}
