use serde::{Deserialize, Serialize};

use crate::parallel::StrategyError;

/// Devices taking part in one compile, split evenly into pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMesh {
    pub device_num: i64,
    pub stage_num: i64,
}

impl DeviceMesh {
    pub fn new(device_num: i64, stage_num: i64) -> Result<Self, StrategyError> {
        if device_num < 1 || stage_num < 1 {
            return Err(StrategyError::InvalidMesh {
                detail: format!("device_num {device_num} and stage_num {stage_num} must be positive"),
            });
        }
        if device_num % stage_num != 0 {
            return Err(StrategyError::InvalidMesh {
                detail: format!("{device_num} devices cannot be split into {stage_num} stages"),
            });
        }
        Ok(Self {
            device_num,
            stage_num,
        })
    }

    pub fn single_stage(device_num: i64) -> Result<Self, StrategyError> {
        Self::new(device_num, 1)
    }

    /// Devices available to the operators of one stage.
    pub fn stage_devices(&self) -> i64 {
        self.device_num / self.stage_num
    }
}
