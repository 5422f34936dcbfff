//! Tutor Request Builder
//!
//! Turns an action plus the current lab context into the instruction sent to
//! the gateway. Everything here is pure: the same inputs always produce the
//! same prompt text.

use crate::{
    action::ActionType,
    lab::LabState,
    quiz::{self, Quiz},
};
use serde_json::{Value, json};

/// Persona sent as the system instruction with every request.
pub const SYSTEM_INSTRUCTION: &str = "Con là 'Trợ lý AI' trong một phòng thí nghiệm ảo cho học sinh lớp 4-5. \
Nhiệm vụ của con là giải thích các hiện tượng vật lý (bay hơi, ngưng tụ, tan chảy, hòa tan) một cách cực kỳ đơn giản, vui vẻ và tự nhiên như đang nói chuyện với một đứa trẻ. \
Luôn giữ câu trả lời rất ngắn gọn (1-2 câu), tập trung vào ý chính. \
Sử dụng ngôn ngữ gần gũi, thân thiện (xưng 'cô/thầy' và gọi học sinh là 'con'). \
Mục tiêu là giúp các con hiểu bài một cách dễ dàng và thú vị. \
Tuyệt đối không sử dụng markdown.";

/// Asks for the one-sentence welcome that opens a session.
pub const GREETING_PROMPT: &str =
    "Hãy viết một lời chào mừng ngắn gọn (1 câu) để bắt đầu buổi thí nghiệm ảo.";

/// Everything besides the action itself that a prompt may depend on.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// Lab state after the action's immediate effect has been applied.
    pub lab: &'a LabState,
    /// Lab actions performed before this one.
    pub history: &'a [ActionType],
    pub used_questions: &'a [String],
    pub user_text: Option<&'a str>,
    pub current_quiz: Option<&'a Quiz>,
}

/// A fully built request for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorPrompt {
    pub action: ActionType,
    pub text: String,
    /// `false` when any quiz in the reply must be discarded.
    pub allows_quiz: bool,
}

pub fn build_prompt(action: ActionType, ctx: &PromptContext<'_>) -> TutorPrompt {
    let text = match action {
        ActionType::HeatWater => with_quiz_bank(
            action,
            "Học sinh vừa chọn hành động \"Đun nóng nước\". Hãy giải thích hiện tượng \"bay hơi\" là gì khi nước được đun nóng.",
            ctx.used_questions,
        ),
        ActionType::AddIce if !ctx.lab.show_vapor => {
            "Học sinh muốn \"Đặt đá lên nắp cốc\" nhưng chưa có hơi nước. Hãy nhẹ nhàng nhắc con cần đun nước để tạo ra hơi nước trước."
                .to_string()
        }
        ActionType::AddIce => with_quiz_bank(
            action,
            "Học sinh vừa \"Đặt đá lên nắp cốc\" khi có hơi nước nóng bốc lên. Hãy giải thích hiện tượng \"ngưng tụ\" là gì khi hơi nước gặp lạnh.",
            ctx.used_questions,
        ),
        ActionType::DropIceInWater => with_quiz_bank(
            action,
            "Học sinh vừa 'Thả viên đá vào nước nóng'. Hãy giải thích hiện tượng 'tan chảy' là gì khi đá (thể rắn) gặp nước nóng và tại sao nước nguội đi.",
            ctx.used_questions,
        ),
        ActionType::DissolveSalt => {
            let base = format!(
                "Học sinh vừa 'Thêm muối vào nước'. Lượng muối hiện tại là {}%. Hãy giải thích hiện tượng 'hòa tan'. Dựa vào độ mặn, hãy nhận xét về trạng thái của nước. Ví dụ: nếu muối ít thì nói 'Nước bây giờ hơi mặn rồi đó con.', nếu muối nhiều thì nói 'Nước mặn hơn nữa rồi!' hoặc 'Bây giờ nước rất mặn!'.",
                ctx.lab.salt_percent()
            );
            with_quiz_bank(action, &base, ctx.used_questions)
        }
        ActionType::AnswerQuiz => {
            let (question, hint) = ctx
                .current_quiz
                .map(|quiz| (quiz.question.as_str(), quiz.correct_answer_hint.as_str()))
                .unwrap_or_default();
            format!(
                "Cô/Thầy đã hỏi con câu: \"{question}\". Con trả lời là: \"{answer}\". Gợi ý câu trả lời đúng là về: \"{hint}\". \
Hãy nhận xét câu trả lời của con. Nếu đúng, hãy khen ngợi. Nếu sai, hãy động viên và giải thích lại một cách đơn giản. Chỉ đưa ra nhận xét, không hỏi thêm câu hỏi nào khác.",
                answer = ctx.user_text.unwrap_or_default(),
            )
        }
        ActionType::AskQuestion => format!(
            "Học sinh vừa hỏi một câu: \"{question}\". Dựa vào bối cảnh thí nghiệm (các hành động đã thực hiện: {previous}), hãy trả lời câu hỏi này một cách đơn giản, phù hợp với học sinh tiểu học. Chỉ trả lời câu hỏi, không hỏi thêm gì cả.",
            question = ctx.user_text.unwrap_or_default(),
            previous = previous_actions(ctx.history),
        ),
    };

    TutorPrompt {
        action,
        text,
        allows_quiz: action != ActionType::AskQuestion,
    }
}

fn previous_actions(history: &[ActionType]) -> String {
    history
        .iter()
        .map(|action| action.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn with_quiz_bank(action: ActionType, base: &str, used_questions: &[String]) -> String {
    let excluded = quiz::excluded_questions(action, used_questions);
    let used = if excluded.is_empty() {
        "Chưa có câu hỏi nào được hỏi.".to_string()
    } else {
        format!("Các câu hỏi đã hỏi: \"{}\".", excluded.join("\", \""))
    };
    // Static data; serialization cannot fail.
    let bank = serde_json::to_string(quiz::bank_for(action)).unwrap_or_default();

    format!(
        "{base} Sau đó, hãy chọn MỘT câu hỏi hoàn toàn mới từ ngân hàng câu hỏi dưới đây để hỏi học sinh. {used}\nNgân hàng câu hỏi cho hành động này: {bank}"
    )
}

/// Structured-output schema the gateway must answer with.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "explanation": {
                "type": "STRING",
                "description": "Lời giải thích ngắn gọn, thân thiện cho học sinh tiểu học (1-2 câu).",
            },
            "quiz": {
                "type": "OBJECT",
                "description": "Một câu hỏi trắc nghiệm nhanh, nếu có.",
                "properties": {
                    "question": {
                        "type": "STRING",
                        "description": "Câu hỏi để kiểm tra hiểu biết của học sinh.",
                    },
                    "correctAnswerHint": {
                        "type": "STRING",
                        "description": "Gợi ý về câu trả lời đúng để kiểm tra câu trả lời của học sinh.",
                    },
                },
            },
        },
        "required": ["explanation"],
    })
}
