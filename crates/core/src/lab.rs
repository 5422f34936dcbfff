//! Lab State Model
//!
//! The visible configuration of the simulated experiment and the pure reducer
//! that moves it forward. Time-lagged effects (vapor rising, droplets forming,
//! ice melting) are returned to the caller as [`DelayedEffect`]s; scheduling
//! them is the controller's job.

use crate::action::ActionType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const VAPOR_DELAY: Duration = Duration::from_millis(2000);
pub const CONDENSATION_DELAY: Duration = Duration::from_millis(2000);
pub const MELT_DELAY: Duration = Duration::from_millis(5000);

/// Salt level ceiling; each level is 10% salinity.
pub const MAX_SALT_LEVEL: u8 = 10;

/// Snapshot of what the learner currently sees in the beaker.
///
/// Unreachable combinations (ice in water while still heating, for instance)
/// are not rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct LabState {
    pub is_heating: bool,
    pub show_vapor: bool,
    pub is_ice_on_lid: bool,
    pub show_condensation: bool,
    pub is_ice_in_water: bool,
    pub is_salt_in_water: bool,
    pub salt_level: u8,
}

/// A follow-up mutation that lands a fixed time after the action that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayedEffect {
    /// Steam becomes visible above the heated water.
    ShowVapor,
    /// Droplets form under the iced lid.
    ShowCondensation,
    /// The dropped ice has melted and cooled the water down.
    MeltIce,
}

impl DelayedEffect {
    pub fn delay(self) -> Duration {
        match self {
            DelayedEffect::ShowVapor => VAPOR_DELAY,
            DelayedEffect::ShowCondensation => CONDENSATION_DELAY,
            DelayedEffect::MeltIce => MELT_DELAY,
        }
    }
}

impl LabState {
    /// Applies the immediate part of `action` and returns the delayed part, if any.
    ///
    /// `AddIce` is inert unless vapor is already showing. Chat actions never
    /// touch the lab.
    pub fn apply(&mut self, action: ActionType) -> Option<DelayedEffect> {
        match action {
            ActionType::HeatWater => {
                self.is_heating = true;
                Some(DelayedEffect::ShowVapor)
            }
            ActionType::AddIce if self.show_vapor => {
                self.is_ice_on_lid = true;
                Some(DelayedEffect::ShowCondensation)
            }
            ActionType::DropIceInWater => {
                self.is_ice_in_water = true;
                Some(DelayedEffect::MeltIce)
            }
            ActionType::DissolveSalt => {
                self.is_salt_in_water = true;
                self.salt_level = (self.salt_level + 1).min(MAX_SALT_LEVEL);
                None
            }
            ActionType::AddIce | ActionType::AskQuestion | ActionType::AnswerQuiz => None,
        }
    }

    pub fn apply_delayed(&mut self, effect: DelayedEffect) {
        match effect {
            DelayedEffect::ShowVapor => self.show_vapor = true,
            DelayedEffect::ShowCondensation => self.show_condensation = true,
            DelayedEffect::MeltIce => {
                self.show_vapor = false;
                self.is_heating = false;
            }
        }
    }

    /// Whether the action panel should offer `action` in this state.
    pub fn is_enabled(&self, action: ActionType) -> bool {
        match action {
            ActionType::HeatWater => {
                !(self.is_heating || self.is_salt_in_water || self.is_ice_in_water)
            }
            ActionType::DissolveSalt => {
                !(self.is_heating || self.is_ice_in_water || self.salt_level >= MAX_SALT_LEVEL)
            }
            ActionType::DropIceInWater => self.is_heating && !self.is_ice_in_water,
            ActionType::AddIce => self.show_vapor && !self.is_ice_on_lid,
            ActionType::AskQuestion | ActionType::AnswerQuiz => true,
        }
    }

    pub fn salt_percent(&self) -> u32 {
        u32::from(self.salt_level) * 10
    }
}
