//! Pod filtering
//!
//! A pod is in scope when it satisfies every configured criterion:
//! membership in the owner group (its StatefulSet selector matches the pod's
//! labels) and the configured label selector. Configuring both narrows the
//! scope to their intersection.

use std::sync::Arc;

use kube::core::SelectorExt;
use tracing::{debug, warn};

use super::selector::LabelSelector;
use super::store::UnitStore;
use crate::error::{Error, Result};
use crate::unit::ManagedUnit;

/// Immutable filter criteria, validated once at startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    owner_group: Option<String>,
    label_selector: Option<LabelSelector>,
}

impl FilterConfig {
    /// Build the filter from raw configuration values
    ///
    /// Empty strings count as unset. At least one criterion is required and
    /// the selector text must parse.
    pub fn new(owner_group: Option<&str>, selector_text: Option<&str>) -> Result<Self> {
        let owner_group = owner_group
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from);
        let selector_text = selector_text.map(str::trim).filter(|s| !s.is_empty());

        if owner_group.is_none() && selector_text.is_none() {
            return Err(Error::ConfigError(
                "either --statefulset or --pod-label-selector (or both) must be provided"
                    .to_string(),
            ));
        }

        let label_selector = selector_text.map(LabelSelector::parse).transpose()?;

        Ok(Self {
            owner_group,
            label_selector,
        })
    }

    pub fn owner_group(&self) -> Option<&str> {
        self.owner_group.as_deref()
    }

    pub fn label_selector(&self) -> Option<&LabelSelector> {
        self.label_selector.as_ref()
    }
}

/// Decides whether a unit is in scope for health evaluation
#[derive(Clone)]
pub struct FilterMatcher {
    config: FilterConfig,
    store: Arc<dyn UnitStore>,
}

impl FilterMatcher {
    pub fn new(config: FilterConfig, store: Arc<dyn UnitStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Returns true iff the unit satisfies every configured criterion
    ///
    /// A failed owner-group lookup excludes the unit and is logged.
    pub async fn matches(&self, unit: &ManagedUnit) -> bool {
        if let Some(group) = self.config.owner_group() {
            if !self.belongs_to_group(unit, group).await {
                return false;
            }
        }

        if let Some(selector) = self.config.label_selector() {
            if !selector.matches(&unit.labels) {
                debug!(
                    "Pod {}/{} does not match selector {}",
                    unit.namespace, unit.name, selector
                );
                return false;
            }
        }

        true
    }

    async fn belongs_to_group(&self, unit: &ManagedUnit, group: &str) -> bool {
        match self.store.group_selector(&unit.namespace, group).await {
            Ok(selector) => {
                let member = selector.matches(&unit.labels);
                if !member {
                    debug!(
                        "Pod {}/{} is not a member of StatefulSet {}",
                        unit.namespace, unit.name, group
                    );
                }
                member
            }
            Err(e) => {
                warn!(
                    "Failed to resolve selector of StatefulSet {}/{}, excluding pod {}: {}",
                    unit.namespace, group, unit.name, e
                );
                false
            }
        }
    }
}
