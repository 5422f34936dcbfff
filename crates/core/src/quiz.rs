use crate::action::ActionType;
use serde::{Deserialize, Serialize};

/// A quick check-for-understanding question posed by the tutor.
///
/// The hint is what the learner's free-text answer is graded against; grading
/// itself happens in the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub question: String,
    pub correct_answer_hint: String,
}

impl Quiz {
    pub fn new(question: impl Into<String>, correct_answer_hint: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            correct_answer_hint: correct_answer_hint.into(),
        }
    }
}

/// One entry of the static question bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankQuestion {
    pub question: &'static str,
    pub correct_answer_hint: &'static str,
}

const fn q(question: &'static str, correct_answer_hint: &'static str) -> BankQuestion {
    BankQuestion {
        question,
        correct_answer_hint,
    }
}

const HEAT_WATER_BANK: [BankQuestion; 3] = [
    q("Khi nước biến thành hơi, ta gọi đó là hiện tượng gì?", "bay hơi"),
    q(
        "Để nước bay hơi nhanh hơn, chúng ta cần làm gì với nước?",
        "đun nóng hoặc tăng nhiệt độ",
    ),
    q("Hơi nước có màu gì?", "không màu"),
];

const ADD_ICE_BANK: [BankQuestion; 3] = [
    q(
        "Khi hơi nước gặp lạnh và biến thành giọt nước, đó là hiện tượng gì?",
        "ngưng tụ",
    ),
    q(
        "Tại sao lại có những giọt nước đọng trên nắp cốc khi ta đặt đá lên trên?",
        "do hơi nước ngưng tụ",
    ),
    q("Mưa được tạo ra nhờ hiện tượng nào chúng ta vừa học?", "ngưng tụ"),
];

const DROP_ICE_BANK: [BankQuestion; 3] = [
    q(
        "Khi viên đá gặp nước nóng và biến mất, đó là hiện tượng gì?",
        "tan chảy",
    ),
    q("Đá ở thể rắn hay thể lỏng?", "thể rắn"),
    q(
        "Tại sao nước trong cốc lại nguội đi khi ta thả đá vào?",
        "đá lấy nhiệt từ nước",
    ),
];

const DISSOLVE_SALT_BANK: [BankQuestion; 3] = [
    q("Khi muối tan trong nước, ta gọi đó là hiện tượng gì?", "hòa tan"),
    q("Trong thí nghiệm hòa tan muối, đâu là chất tan?", "muối"),
    q(
        "Làm thế nào để muối tan nhanh hơn trong nước?",
        "khuấy đều hoặc đun nóng",
    ),
];

/// The question bank for `action`; empty for chat actions, which never quiz.
pub fn bank_for(action: ActionType) -> &'static [BankQuestion] {
    match action {
        ActionType::HeatWater => &HEAT_WATER_BANK,
        ActionType::AddIce => &ADD_ICE_BANK,
        ActionType::DropIceInWater => &DROP_ICE_BANK,
        ActionType::DissolveSalt => &DISSOLVE_SALT_BANK,
        ActionType::AskQuestion | ActionType::AnswerQuiz => &[],
    }
}

/// Questions to list as "already asked" when offering the bank for `action`.
///
/// Once every question of the bank has been used the bank wraps around: its
/// own questions are dropped from the list so the tutor may ask them again,
/// while questions from other banks stay excluded.
pub fn excluded_questions<'a>(action: ActionType, used: &'a [String]) -> Vec<&'a str> {
    let bank = bank_for(action);
    let in_bank = |question: &str| bank.iter().any(|entry| entry.question == question);
    let exhausted = !bank.is_empty()
        && bank
            .iter()
            .all(|entry| used.iter().any(|u| u == entry.question));

    used.iter()
        .map(String::as_str)
        .filter(|question| !(exhausted && in_bank(*question)))
        .collect()
}
