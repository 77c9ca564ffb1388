//! Maestro models

use serde::{Deserialize, Serialize};

/// The Maestro family members and their channel counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaestroModel {
    /// Micro Maestro 6
    Micro,
    /// Mini Maestro 12
    Mini12,
    /// Mini Maestro 18
    Mini18,
    /// Mini Maestro 24
    Mini24,
}

impl MaestroModel {
    /// Number of channels
    pub fn channels(&self) -> u8 {
        match self {
            MaestroModel::Micro => 6,
            MaestroModel::Mini12 => 12,
            MaestroModel::Mini18 => 18,
            MaestroModel::Mini24 => 24,
        }
    }

    /// Channel driving the PWM output, if the model has one
    pub fn pwm_channel(&self) -> Option<u8> {
        match self {
            MaestroModel::Micro => None,
            MaestroModel::Mini12 => Some(8),
            MaestroModel::Mini18 | MaestroModel::Mini24 => Some(12),
        }
    }

    /// Whether `channel` exists on this model
    pub fn has_channel(&self, channel: u8) -> bool {
        channel < self.channels()
    }
}
