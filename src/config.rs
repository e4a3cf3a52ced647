//! Center-of-mass settings shared by the CLI, the web surface and scene files.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::engine::UpdateOptions;

fn default_update_rate() -> u32 {
    5
}

/// Which marker follows which collection, and how.
///
/// `update_rate` counts hundredths of a second between continuous-update
/// ticks, so the default of 5 means one recomputation every 50 ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComSettings {
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub scale_to_floor: bool,
    #[serde(default)]
    pub floor: f64,
    #[serde(default)]
    pub snap_cursor: bool,
    #[serde(default = "default_update_rate")]
    pub update_rate: u32,
}

impl Default for ComSettings {
    fn default() -> Self {
        Self {
            marker: None,
            group: None,
            scale_to_floor: false,
            floor: 0.0,
            snap_cursor: false,
            update_rate: default_update_rate(),
        }
    }
}

impl ComSettings {
    pub const UPDATE_RATE_UNIT: Duration = Duration::from_millis(10);

    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            snap_cursor: self.snap_cursor,
            scale_to_floor: self.scale_to_floor,
            floor_level: self.floor,
        }
    }

    pub fn update_interval(&self) -> Duration {
        Self::UPDATE_RATE_UNIT * self.update_rate.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_rate == 0 {
            bail!("update_rate must be at least 1");
        }
        if !self.floor.is_finite() {
            bail!("floor must be a finite number");
        }
        Ok(())
    }
}
