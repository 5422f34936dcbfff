use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A discrete thing the learner can do in the lab.
///
/// The first four are simulation actions triggered from the action panel; the
/// last two are produced by the free-text input, depending on whether a quiz
/// is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    HeatWater,
    AddIce,
    DropIceInWater,
    DissolveSalt,
    AskQuestion,
    AnswerQuiz,
}

impl ActionType {
    /// Simulation actions, in the order the action panel shows them.
    pub const LAB_ACTIONS: [ActionType; 4] = [
        ActionType::HeatWater,
        ActionType::DissolveSalt,
        ActionType::DropIceInWater,
        ActionType::AddIce,
    ];

    /// Whether this action mutates the lab (as opposed to a chat message).
    pub fn is_lab_action(self) -> bool {
        !matches!(self, ActionType::AskQuestion | ActionType::AnswerQuiz)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::HeatWater => "HEAT_WATER",
            ActionType::AddIce => "ADD_ICE",
            ActionType::DropIceInWater => "DROP_ICE_IN_WATER",
            ActionType::DissolveSalt => "DISSOLVE_SALT",
            ActionType::AskQuestion => "ASK_QUESTION",
            ActionType::AnswerQuiz => "ANSWER_QUIZ",
        }
    }

    /// Button caption shown to the learner.
    pub fn label(self) -> &'static str {
        match self {
            ActionType::HeatWater => "Đun nóng nước",
            ActionType::AddIce => "Đặt đá lên nắp",
            ActionType::DropIceInWater => "Thả đá vào nước nóng",
            ActionType::DissolveSalt => "Thêm muối",
            ActionType::AskQuestion => "Hỏi trợ lý AI",
            ActionType::AnswerQuiz => "Câu trả lời của con",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown action: '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for ActionType {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HEAT_WATER" => Ok(ActionType::HeatWater),
            "ADD_ICE" => Ok(ActionType::AddIce),
            "DROP_ICE_IN_WATER" => Ok(ActionType::DropIceInWater),
            "DISSOLVE_SALT" => Ok(ActionType::DissolveSalt),
            "ASK_QUESTION" => Ok(ActionType::AskQuestion),
            "ANSWER_QUIZ" => Ok(ActionType::AnswerQuiz),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}
