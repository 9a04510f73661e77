//! Tier planning around a focus index
//!
//! Given the focus index, the collection length and the configured radii,
//! computes which indices belong to which tier and when each tier is due:
//!
//! 1. Critical - the focus itself, immediately
//! 2. High - focus ±1..=high_radius, after the high delay
//! 3. Normal - out to ±normal_radius, after the normal delay
//! 4. Low - out to ±low_radius, after the low delay
//!
//! Indices before 0 or at/after the collection length are skipped. Within a
//! tier, nearer indices come first and the forward neighbor precedes the
//! backward one.

use crate::priority::Tier;
use pageflow_cache::{outward_indices, EngineConfig};
use std::time::Duration;

/// Radii of the HIGH, NORMAL and LOW tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierRadii {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl TierRadii {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            high: config.high_radius,
            normal: config.normal_radius,
            low: config.low_radius,
        }
    }
}

impl Default for TierRadii {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// One delayed scheduling step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStage {
    /// Tier assigned to every index of the stage
    pub tier: Tier,

    /// Delay after the focus change before the stage is scheduled
    pub delay: Duration,

    /// Indices to schedule, nearest first
    pub indices: Vec<usize>,
}

/// The warm window around one focus index
///
/// # Example
///
/// ```
/// use pageflow_scheduler::{TierPlan, TierRadii};
///
/// let radii = TierRadii { high: 1, normal: 3, low: 5 };
/// let plan = TierPlan::around(0, 100, radii);
///
/// assert_eq!(plan.high, vec![1]);
/// assert_eq!(plan.normal, vec![2, 3]);
/// assert_eq!(plan.low, vec![4, 5]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPlan {
    /// The focus index
    pub focus: usize,

    /// HIGH tier indices
    pub high: Vec<usize>,

    /// NORMAL tier indices
    pub normal: Vec<usize>,

    /// LOW tier indices
    pub low: Vec<usize>,
}

impl TierPlan {
    /// Plan the tiers around `focus` in a collection of `len` items
    pub fn around(focus: usize, len: usize, radii: TierRadii) -> Self {
        let high = outward_indices(focus, 1, radii.high, len);
        let normal = outward_indices(focus, radii.high + 1, radii.normal, len);
        let low = outward_indices(focus, radii.normal.max(radii.high) + 1, radii.low, len);
        Self {
            focus,
            high,
            normal,
            low,
        }
    }

    /// The delayed stages in scheduling order, paired with the configured
    /// stagger delays
    ///
    /// Empty stages are omitted.
    pub fn stages(&self, config: &EngineConfig) -> Vec<TierStage> {
        [
            (Tier::High, config.high_delay(), &self.high),
            (Tier::Normal, config.normal_delay(), &self.normal),
            (Tier::Low, config.low_delay(), &self.low),
        ]
        .into_iter()
        .filter(|(_, _, indices)| !indices.is_empty())
        .map(|(tier, delay, indices)| TierStage {
            tier,
            delay,
            indices: indices.clone(),
        })
        .collect()
    }

    /// Every planned index, focus excluded
    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
