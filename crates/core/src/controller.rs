//! Lab Controller
//!
//! Owns one learner's session: the beaker, the action history, the quiz
//! bookkeeping, the transcript and the credential. All mutations go through
//! this type, so the busy flag and the delayed lab effects are coordinated in
//! one place.

use crate::{
    action::ActionType,
    gateway::{GatewayError, TutorGateway, TutorReply},
    lab::{DelayedEffect, LabState},
    prompt::{PromptContext, build_prompt},
    quiz::Quiz,
    sound::SoundEffect,
    storage::{SessionStore, StorageError},
    transcript::{CONNECTION_ERROR_MESSAGE, ChatMessage, Transcript},
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Shown in the key prompt after the gateway rejected the credential.
pub const INVALID_API_KEY_MESSAGE: &str = "API Key không hợp lệ. Vui lòng kiểm tra và nhập lại.";
/// Shown in the key prompt when the learner submits an empty key.
pub const EMPTY_API_KEY_MESSAGE: &str = "Vui lòng nhập API Key.";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("A tutor request is already in flight")]
    Busy,
    #[error("No API key is configured")]
    MissingApiKey,
    #[error("Message text is empty")]
    EmptyMessage,
    #[error("API key is empty")]
    EmptyApiKey,
    #[error("{0} is not a lab action")]
    NotALabAction(ActionType),
    /// Only a rejected credential surfaces here; other gateway failures
    /// become a transcript notice.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// --- Views ---

/// Whether one lab button is currently offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ActionAvailability {
    pub action: ActionType,
    pub label: String,
    pub enabled: bool,
}

/// An owned copy of everything a front end needs to render the lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct LabSnapshot {
    pub lab: LabState,
    pub actions: Vec<ActionAvailability>,
    pub busy: bool,
    pub quiz: Option<Quiz>,
    pub messages: Vec<ChatMessage>,
    pub needs_api_key: bool,
    pub api_key_error: Option<String>,
}

/// What a single call changed, for the caller to play back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// The AI message appended by this call, if any.
    pub message: Option<ChatMessage>,
    /// A quiz that is now pending.
    pub quiz: Option<Quiz>,
    pub cues: Vec<SoundEffect>,
}

impl Outcome {
    fn with_cue(cue: SoundEffect) -> Self {
        Self {
            cues: vec![cue],
            ..Default::default()
        }
    }
}

// --- Session State ---

#[derive(Default)]
struct Session {
    lab: LabState,
    history: Vec<ActionType>,
    used_questions: Vec<String>,
    quiz: Option<Quiz>,
    transcript: Transcript,
    api_key: Option<String>,
    needs_api_key: bool,
    api_key_error: Option<String>,
    timers: Vec<JoinHandle<()>>,
}

impl Session {
    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

/// Holds the busy flag for the lifetime of one tutor round trip.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ControllerError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ControllerError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// --- Controller ---

pub struct LabController {
    gateway: Arc<dyn TutorGateway>,
    store: SessionStore,
    /// Operator-provided key used when the learner has not stored one.
    host_api_key: Option<String>,
    session: Arc<Mutex<Session>>,
    busy: AtomicBool,
}

impl LabController {
    pub fn new(
        gateway: Arc<dyn TutorGateway>,
        store: SessionStore,
        host_api_key: Option<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            host_api_key: host_api_key.filter(|key| !key.trim().is_empty()),
            session: Arc::new(Mutex::new(Session::default())),
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Restores the stored transcript and credential.
    ///
    /// A greeting is requested only when there is a key and nothing was
    /// restored; without a key the prompt is opened instead.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), ControllerError> {
        let history = self.store.load_history();
        let api_key = match self.store.api_key()? {
            Some(key) => Some(key),
            None => self.host_api_key.clone(),
        };

        let needs_greeting = {
            let mut session = self.session.lock().await;
            session.transcript = Transcript::from_messages(history);
            session.api_key = api_key.clone();
            session.needs_api_key = api_key.is_none();
            info!(
                restored_messages = session.transcript.len(),
                has_api_key = api_key.is_some(),
                "Lab session started"
            );
            session.transcript.is_empty()
        };

        match api_key {
            Some(key) if needs_greeting => {
                let _busy = BusyGuard::acquire(&self.busy)?;
                let mut outcome = Outcome::default();
                self.load_greeting(&key, &mut outcome).await
            }
            _ => Ok(()),
        }
    }

    /// Performs one of the four lab actions and asks the tutor about it.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, action: ActionType) -> Result<Outcome, ControllerError> {
        if !action.is_lab_action() {
            return Err(ControllerError::NotALabAction(action));
        }
        let api_key = self.require_api_key().await?;
        let _busy = BusyGuard::acquire(&self.busy)?;

        let prompt = {
            let mut session = self.session.lock().await;
            let previous = session.history.clone();
            session.history.push(action);
            if let Some(effect) = session.lab.apply(action) {
                self.schedule(&mut session, effect);
            }
            debug!(lab = ?session.lab, "Applied lab action");
            build_prompt(
                action,
                &PromptContext {
                    lab: &session.lab,
                    history: &previous,
                    used_questions: &session.used_questions,
                    user_text: None,
                    current_quiz: None,
                },
            )
        };

        let result = self.gateway.respond(&api_key, &prompt).await;

        let mut session = self.session.lock().await;
        let mut outcome = Outcome::with_cue(SoundEffect::Click);
        self.record_reply(
            &mut session,
            result,
            prompt.allows_quiz,
            ChatMessage::ai,
            &mut outcome,
        )?;
        Ok(outcome)
    }

    /// Sends free text: an answer when a quiz is pending, otherwise an open question.
    ///
    /// A pending quiz is cleared once the reply resolves, whether or not the
    /// request succeeded.
    #[instrument(skip(self, text))]
    pub async fn submit_message(&self, text: &str) -> Result<Outcome, ControllerError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ControllerError::EmptyMessage);
        }
        let api_key = self.require_api_key().await?;
        let _busy = BusyGuard::acquire(&self.busy)?;

        let (prompt, answering) = {
            let mut session = self.session.lock().await;
            session.transcript.push(ChatMessage::user(text));
            self.persist(&session);

            let answering = session.quiz.is_some();
            let action = if answering {
                ActionType::AnswerQuiz
            } else {
                ActionType::AskQuestion
            };
            let prompt = build_prompt(
                action,
                &PromptContext {
                    lab: &session.lab,
                    history: &session.history,
                    used_questions: &session.used_questions,
                    user_text: Some(text),
                    current_quiz: session.quiz.as_ref(),
                },
            );
            (prompt, answering)
        };
        debug!(action = %prompt.action, "Submitting learner message");

        let result = self.gateway.respond(&api_key, &prompt).await;

        let mut session = self.session.lock().await;
        let mut outcome = Outcome::with_cue(SoundEffect::Send);
        let recorded = self.record_reply(
            &mut session,
            result,
            prompt.allows_quiz,
            ChatMessage::feedback,
            &mut outcome,
        );
        if answering {
            session.quiz = None;
            outcome.quiz = None;
        }
        recorded?;
        Ok(outcome)
    }

    /// Starts over: cancels pending lab effects, forgets the transcript and
    /// loads a fresh greeting.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<Outcome, ControllerError> {
        let api_key = self.require_api_key().await?;
        let _busy = BusyGuard::acquire(&self.busy)?;

        {
            let mut session = self.session.lock().await;
            session.cancel_timers();
            session.lab = LabState::default();
            session.history.clear();
            session.used_questions.clear();
            session.quiz = None;
            self.store.clear_history()?;
        }
        info!("Lab reset");

        let mut outcome = Outcome::with_cue(SoundEffect::Click);
        self.load_greeting(&api_key, &mut outcome).await?;
        Ok(outcome)
    }

    /// Stores a new credential and greets the learner with it.
    #[instrument(skip_all)]
    pub async fn set_api_key(&self, key: &str) -> Result<Outcome, ControllerError> {
        let key = key.trim();
        if key.is_empty() {
            let mut session = self.session.lock().await;
            session.needs_api_key = true;
            session.api_key_error = Some(EMPTY_API_KEY_MESSAGE.to_string());
            return Err(ControllerError::EmptyApiKey);
        }
        let _busy = BusyGuard::acquire(&self.busy)?;

        self.store.save_api_key(key)?;
        {
            let mut session = self.session.lock().await;
            session.api_key = Some(key.to_string());
            session.needs_api_key = false;
            session.api_key_error = None;
        }
        info!("API key updated");

        let mut outcome = Outcome::default();
        self.load_greeting(key, &mut outcome).await?;
        Ok(outcome)
    }

    pub async fn snapshot(&self) -> LabSnapshot {
        let busy = self.is_busy();
        let session = self.session.lock().await;
        let actions = ActionType::LAB_ACTIONS
            .iter()
            .map(|&action| ActionAvailability {
                action,
                label: action.label().to_string(),
                enabled: !busy && session.lab.is_enabled(action),
            })
            .collect();

        LabSnapshot {
            lab: session.lab,
            actions,
            busy,
            quiz: session.quiz.clone(),
            messages: session.transcript.messages().to_vec(),
            needs_api_key: session.needs_api_key,
            api_key_error: session.api_key_error.clone(),
        }
    }

    /// Base64 speech attached to the latest message with `id`.
    pub async fn message_audio(&self, id: &str) -> Option<String> {
        let session = self.session.lock().await;
        session
            .transcript
            .find(id)
            .and_then(|message| message.audio.clone())
    }

    // --- Internals ---

    async fn require_api_key(&self) -> Result<String, ControllerError> {
        let mut session = self.session.lock().await;
        match session.api_key.clone() {
            Some(key) => Ok(key),
            None => {
                session.needs_api_key = true;
                Err(ControllerError::MissingApiKey)
            }
        }
    }

    fn schedule(&self, session: &mut Session, effect: DelayedEffect) {
        let shared = Arc::clone(&self.session);
        session.timers.retain(|timer| !timer.is_finished());
        session.timers.push(tokio::spawn(async move {
            tokio::time::sleep(effect.delay()).await;
            shared.lock().await.lab.apply_delayed(effect);
            debug!(?effect, "Applied delayed lab effect");
        }));
    }

    /// Replaces the transcript with a greeting. The caller holds the busy flag.
    async fn load_greeting(
        &self,
        api_key: &str,
        outcome: &mut Outcome,
    ) -> Result<(), ControllerError> {
        self.session.lock().await.transcript.clear();

        let result = self.gateway.greeting(api_key).await;

        let mut session = self.session.lock().await;
        match result {
            Ok(greeting) => {
                let message = ChatMessage::greeting(greeting.text, greeting.audio);
                session.transcript.replace_with(message.clone());
                self.persist(&session);
                outcome.message = Some(message);
                Ok(())
            }
            Err(e) => self.record_failure(&mut session, e, outcome),
        }
    }

    /// Quizzes are only kept for prompts that allow one.
    fn record_reply<F>(
        &self,
        session: &mut Session,
        result: Result<TutorReply, GatewayError>,
        allows_quiz: bool,
        to_message: F,
        outcome: &mut Outcome,
    ) -> Result<(), ControllerError>
    where
        F: FnOnce(String, Option<String>) -> ChatMessage,
    {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => return self.record_failure(session, e, outcome),
        };

        let message = to_message(reply.explanation, reply.audio);
        session.transcript.push(message.clone());
        if message.plays_receive_cue() {
            outcome.cues.push(SoundEffect::Receive);
        }
        if let Some(quiz) = reply.quiz.filter(|_| allows_quiz) {
            session.used_questions.push(quiz.question.clone());
            session.quiz = Some(quiz.clone());
            outcome.quiz = Some(quiz);
        }
        self.persist(session);
        outcome.message = Some(message);
        Ok(())
    }

    /// A rejected key reopens the prompt and is returned as an error; any
    /// other failure becomes a transcript notice.
    fn record_failure(
        &self,
        session: &mut Session,
        err: GatewayError,
        outcome: &mut Outcome,
    ) -> Result<(), ControllerError> {
        if err.is_invalid_api_key() {
            warn!(error = %err, "Gateway rejected the API key");
            if let Err(e) = self.store.clear_api_key() {
                warn!(error = %e, "Could not clear the stored API key");
            }
            session.api_key = None;
            session.needs_api_key = true;
            session.api_key_error = Some(INVALID_API_KEY_MESSAGE.to_string());
            return Err(ControllerError::Gateway(err));
        }

        error!(error = %err, "Tutor request failed");
        outcome.message = session
            .transcript
            .push_error_notice(CONNECTION_ERROR_MESSAGE);
        self.persist(session);
        Ok(())
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save_history(session.transcript.messages()) {
            warn!(error = %e, "Could not save chat history");
        }
    }
}

impl Drop for LabController {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.try_lock() {
            session.cancel_timers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Greeting, MockTutorGateway};
    use crate::prompt::TutorPrompt;
    use crate::storage::{API_KEY, CHAT_HISTORY, KeyValueStore, MemoryStore};
    use crate::transcript::Sender;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn greeting_ok() -> Result<Greeting, GatewayError> {
        Ok(Greeting {
            text: "Chào mừng con đến phòng thí nghiệm!".to_string(),
            audio: None,
        })
    }

    fn reply(explanation: &str, quiz: Option<Quiz>) -> Result<TutorReply, GatewayError> {
        Ok(TutorReply {
            explanation: explanation.to_string(),
            quiz,
            audio: None,
        })
    }

    fn keyed_store() -> (Arc<MemoryStore>, SessionStore) {
        let raw = Arc::new(MemoryStore::new());
        raw.set(API_KEY, "AIza-test").unwrap();
        (raw.clone(), SessionStore::new(raw))
    }

    async fn started(gateway: MockTutorGateway) -> (Arc<MemoryStore>, LabController) {
        let (raw, store) = keyed_store();
        let controller = LabController::new(Arc::new(gateway), store, None);
        controller.start().await.unwrap();
        (raw, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_heat_water_shows_vapor_after_two_seconds() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway
            .expect_respond()
            .returning(|_, _| reply("Nước đang nóng lên!", None));
        let (_, controller) = started(gateway).await;

        let outcome = controller.dispatch(ActionType::HeatWater).await.unwrap();
        assert_eq!(outcome.cues, vec![SoundEffect::Click, SoundEffect::Receive]);
        assert_eq!(outcome.message.unwrap().text, "Nước đang nóng lên!");

        let snapshot = controller.snapshot().await;
        assert!(snapshot.lab.is_heating);
        assert!(!snapshot.lab.show_vapor);

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(!controller.snapshot().await.lab.show_vapor);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(controller.snapshot().await.lab.show_vapor);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_effects() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway
            .expect_respond()
            .returning(|_, _| reply("Đun nước nhé!", None));
        let (_, controller) = started(gateway).await;

        controller.dispatch(ActionType::HeatWater).await.unwrap();
        let outcome = controller.reset().await.unwrap();
        assert_eq!(outcome.cues, vec![SoundEffect::Click]);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.lab, LabState::default());
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.messages[0].is_greeting());
    }

    #[tokio::test]
    async fn test_prompt_sees_history_before_action() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| {
                prompt.action == ActionType::AskQuestion
                    && prompt.text.contains("các hành động đã thực hiện: DISSOLVE_SALT)")
            })
            .returning(|_, _| reply("Muối tan trong nước con nhé.", None));
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| prompt.action == ActionType::DissolveSalt)
            .returning(|_, _| reply("Muối tan rồi!", None));
        let (_, controller) = started(gateway).await;

        controller.dispatch(ActionType::DissolveSalt).await.unwrap();
        let outcome = controller.submit_message("Muối đi đâu rồi?").await.unwrap();
        assert_eq!(outcome.cues, vec![SoundEffect::Send, SoundEffect::Receive]);
        assert!(outcome.message.unwrap().id.ends_with("-feedback"));

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.lab.salt_level, 1);
        let senders: Vec<Sender> = snapshot.messages.iter().map(|m| m.sender).collect();
        assert_eq!(senders, vec![Sender::Ai, Sender::Ai, Sender::User, Sender::Ai]);
    }

    #[tokio::test]
    async fn test_quiz_is_cleared_after_answer() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| prompt.action == ActionType::HeatWater)
            .returning(|_, _| {
                reply(
                    "Nước bay hơi.",
                    Some(Quiz::new("Hơi nước có màu gì?", "không màu")),
                )
            });
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| {
                prompt.action == ActionType::AnswerQuiz && prompt.text.contains("\"không màu\"")
            })
            .returning(|_, _| reply("Đúng rồi!", None));
        let (_, controller) = started(gateway).await;

        let outcome = controller.dispatch(ActionType::HeatWater).await.unwrap();
        assert!(outcome.quiz.is_some());
        assert!(controller.snapshot().await.quiz.is_some());

        let outcome = controller.submit_message("không màu").await.unwrap();
        assert_eq!(outcome.quiz, None);
        assert_eq!(controller.snapshot().await.quiz, None);
    }

    #[tokio::test]
    async fn test_quiz_is_cleared_even_when_grading_fails() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| prompt.action == ActionType::DropIceInWater)
            .returning(|_, _| reply("Đá tan.", Some(Quiz::new("Đá tan thành gì?", "nước"))));
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| prompt.action == ActionType::AnswerQuiz)
            .returning(|_, _| Err(GatewayError::Transport("timeout".to_string())));
        let (_, controller) = started(gateway).await;

        controller.dispatch(ActionType::DropIceInWater).await.unwrap();
        let outcome = controller.submit_message("nước").await.unwrap();
        assert!(outcome.message.unwrap().is_error_notice());
        assert_eq!(controller.snapshot().await.quiz, None);
    }

    #[tokio::test]
    async fn test_open_question_never_sets_quiz() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway
            .expect_respond()
            .withf(|_, prompt: &TutorPrompt| {
                prompt.action == ActionType::AskQuestion && !prompt.allows_quiz
            })
            .returning(|_, _| {
                reply("Vì nước bốc hơi con ạ.", Some(Quiz::new("Mây làm từ gì?", "nước")))
            });
        let (_, controller) = started(gateway).await;

        let outcome = controller.submit_message("Vì sao có mây?").await.unwrap();
        assert_eq!(outcome.quiz, None);
        assert_eq!(
            outcome.message.unwrap().text,
            "Vì nước bốc hơi con ạ."
        );
        assert_eq!(controller.snapshot().await.quiz, None);
    }

    #[tokio::test]
    async fn test_repeated_failures_leave_one_notice() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway.expect_respond().returning(|_, _| {
            Err(GatewayError::Http {
                status: 503,
                message: "UNAVAILABLE".to_string(),
            })
        });
        let (raw, controller) = started(gateway).await;

        let first = controller.dispatch(ActionType::DissolveSalt).await.unwrap();
        assert!(first.message.unwrap().is_error_notice());
        assert_eq!(first.cues, vec![SoundEffect::Click]);

        let second = controller.dispatch(ActionType::DissolveSalt).await.unwrap();
        assert_eq!(second.message, None);

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].text, CONNECTION_ERROR_MESSAGE);
        assert!(!snapshot.busy);

        let saved = raw.get(CHAT_HISTORY).unwrap().unwrap();
        assert!(saved.contains(CONNECTION_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_invalid_key_clears_stored_credential() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| greeting_ok());
        gateway.expect_respond().returning(|_, _| {
            Err(GatewayError::from_message(
                Some(400),
                "INVALID_ARGUMENT: API key not valid.".to_string(),
            ))
        });
        let (raw, controller) = started(gateway).await;

        let err = controller.dispatch(ActionType::HeatWater).await.unwrap_err();
        assert!(matches!(err, ControllerError::Gateway(ref e) if e.is_invalid_api_key()));
        assert_eq!(raw.get(API_KEY).unwrap(), None);

        let snapshot = controller.snapshot().await;
        assert!(snapshot.needs_api_key);
        assert_eq!(snapshot.api_key_error.as_deref(), Some(INVALID_API_KEY_MESSAGE));
        assert!(!snapshot.busy);

        let err = controller.dispatch(ActionType::DissolveSalt).await.unwrap_err();
        assert!(matches!(err, ControllerError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_missing_key_opens_prompt() {
        let gateway = MockTutorGateway::new();
        let controller = LabController::new(
            Arc::new(gateway),
            SessionStore::new(Arc::new(MemoryStore::new())),
            None,
        );
        controller.start().await.unwrap();

        let snapshot = controller.snapshot().await;
        assert!(snapshot.needs_api_key);
        assert!(snapshot.messages.is_empty());
        assert!(matches!(
            controller.dispatch(ActionType::HeatWater).await,
            Err(ControllerError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_set_api_key_validates_and_greets() {
        let mut gateway = MockTutorGateway::new();
        gateway
            .expect_greeting()
            .withf(|key: &str| key == "AIza-new")
            .times(1)
            .returning(|_| greeting_ok());
        let raw = Arc::new(MemoryStore::new());
        let controller = LabController::new(
            Arc::new(gateway),
            SessionStore::new(raw.clone()),
            None,
        );
        controller.start().await.unwrap();

        assert!(matches!(
            controller.set_api_key("   ").await,
            Err(ControllerError::EmptyApiKey)
        ));
        assert_eq!(
            controller.snapshot().await.api_key_error.as_deref(),
            Some(EMPTY_API_KEY_MESSAGE)
        );

        let outcome = controller.set_api_key(" AIza-new ").await.unwrap();
        assert!(outcome.message.unwrap().is_greeting());
        assert!(outcome.cues.is_empty());
        assert_eq!(raw.get(API_KEY).unwrap().as_deref(), Some("AIza-new"));

        let snapshot = controller.snapshot().await;
        assert!(!snapshot.needs_api_key);
        assert_eq!(snapshot.api_key_error, None);
    }

    #[tokio::test]
    async fn test_start_with_history_skips_greeting() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().never();
        let (raw, store) = keyed_store();
        store
            .save_history(&[ChatMessage::greeting("Chào con", None), ChatMessage::user("Dạ")])
            .unwrap();
        let controller = LabController::new(Arc::new(gateway), store, None);
        controller.start().await.unwrap();

        assert_eq!(controller.snapshot().await.messages.len(), 2);
        assert!(raw.get(CHAT_HISTORY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_host_key_is_used_when_nothing_stored() {
        let mut gateway = MockTutorGateway::new();
        gateway
            .expect_greeting()
            .withf(|key: &str| key == "host-key")
            .times(1)
            .returning(|_| greeting_ok());
        let controller = LabController::new(
            Arc::new(gateway),
            SessionStore::new(Arc::new(MemoryStore::new())),
            Some("host-key".to_string()),
        );
        controller.start().await.unwrap();
        assert!(!controller.snapshot().await.needs_api_key);
    }

    #[tokio::test]
    async fn test_chat_actions_are_not_dispatchable() {
        let (_, controller) = started({
            let mut gateway = MockTutorGateway::new();
            gateway.expect_greeting().returning(|_| greeting_ok());
            gateway
        })
        .await;
        assert!(matches!(
            controller.dispatch(ActionType::AskQuestion).await,
            Err(ControllerError::NotALabAction(ActionType::AskQuestion))
        ));
        assert!(matches!(
            controller.submit_message("  ").await,
            Err(ControllerError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn test_message_audio_lookup() {
        let mut gateway = MockTutorGateway::new();
        gateway.expect_greeting().returning(|_| {
            Ok(Greeting {
                text: "Xin chào".to_string(),
                audio: Some("AAAA".to_string()),
            })
        });
        let (_, controller) = started(gateway).await;
        assert_eq!(controller.message_audio("init").await.as_deref(), Some("AAAA"));
        assert_eq!(controller.message_audio("nope").await, None);
    }

    /// Holds every reply until released, so a request can be kept in flight.
    struct GatedGateway {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TutorGateway for GatedGateway {
        async fn greeting(&self, _api_key: &str) -> Result<Greeting, GatewayError> {
            greeting_ok()
        }

        async fn respond(
            &self,
            _api_key: &str,
            _prompt: &TutorPrompt,
        ) -> Result<TutorReply, GatewayError> {
            self.entered.notify_one();
            self.release.notified().await;
            reply("Xong rồi!", None)
        }
    }

    #[tokio::test]
    async fn test_second_submission_is_rejected_while_busy() {
        let gateway = Arc::new(GatedGateway {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let (_, store) = keyed_store();
        let controller = Arc::new(LabController::new(gateway.clone(), store, None));
        controller.start().await.unwrap();

        let in_flight = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.dispatch(ActionType::HeatWater).await })
        };
        gateway.entered.notified().await;

        assert!(matches!(
            controller.dispatch(ActionType::DissolveSalt).await,
            Err(ControllerError::Busy)
        ));
        assert!(matches!(
            controller.submit_message("Con hỏi").await,
            Err(ControllerError::Busy)
        ));
        assert!(matches!(controller.reset().await, Err(ControllerError::Busy)));

        let snapshot = controller.snapshot().await;
        assert!(snapshot.busy);
        assert!(snapshot.actions.iter().all(|a| !a.enabled));

        gateway.release.notify_one();
        assert!(in_flight.await.unwrap().is_ok());
        assert!(!controller.is_busy());

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.lab.salt_level, 0);
        assert!(snapshot.actions.iter().any(|a| a.enabled));
    }
}
