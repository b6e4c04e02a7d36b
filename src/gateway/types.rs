//! Request and response types shared by the gateway and its clients.

use serde::{Deserialize, Serialize};

use crate::config::FeatureSettings;
use crate::error::Error;

/// One of the gateway's feature endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Consultant chat with full conversation history (streamed).
    Chat,
    /// Campaign planner (streamed).
    Plan,
    /// Quiz generator (buffered, parsed into JSON).
    Quiz,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Chat, Feature::Plan, Feature::Quiz];

    /// Path segment under `/api/ai/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Chat => "chat",
            Feature::Plan => "plan",
            Feature::Quiz => "quiz",
        }
    }

    /// Whether the upstream response is relayed as a stream.
    pub fn streams(&self) -> bool {
        !matches!(self, Feature::Quiz)
    }

    pub fn default_system_prompt(&self) -> &'static str {
        match self {
            Feature::Chat => "You are a helpful marketing consultant.",
            Feature::Plan => "You are a helpful marketing strategist.",
            Feature::Quiz => "You are a quiz generator for digital marketing topics.",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Feature::Chat | Feature::Plan => "moonshotai/kimi-k2",
            Feature::Quiz => "meta/llama-3.3-70b-instruct",
        }
    }

    pub fn default_max_tokens(&self) -> u32 {
        match self {
            Feature::Chat | Feature::Plan => 4096,
            Feature::Quiz => 2048,
        }
    }

    pub fn default_temperature(&self) -> f32 {
        match self {
            Feature::Chat | Feature::Plan => 0.7,
            Feature::Quiz => 0.6,
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Feature::Chat),
            "plan" => Ok(Feature::Plan),
            "quiz" => Ok(Feature::Quiz),
            other => Err(format!("unknown feature '{}'", other)),
        }
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body accepted by every feature endpoint.
///
/// Carries either a full conversation (`messages`) or a single
/// `userMessage`. The quiz endpoint only reads `userMessage`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
}

impl ChatRequest {
    /// A single-turn request.
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            user_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// A request carrying a full conversation history.
    pub fn conversation(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Some(messages),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// The caller-supplied turns for `feature`, without the system message.
    ///
    /// Non-empty `messages` win over `userMessage`. Quiz requests only
    /// accept `userMessage`.
    pub fn turns(&self, feature: Feature) -> Result<Vec<ChatMessage>, Error> {
        let user_message = self.user_message.as_deref().filter(|m| !m.is_empty());

        if feature == Feature::Quiz {
            return user_message
                .map(|m| vec![ChatMessage::new(Role::User, m)])
                .ok_or_else(|| Error::BadRequest("userMessage is required".to_string()));
        }

        match (&self.messages, user_message) {
            (Some(messages), _) if !messages.is_empty() => Ok(messages.clone()),
            (_, Some(m)) => Ok(vec![ChatMessage::new(Role::User, m)]),
            _ => Err(Error::BadRequest(
                "messages or userMessage is required".to_string(),
            )),
        }
    }

    /// Full upstream message list: a leading system message followed by the
    /// caller's turns.
    ///
    /// The system content is `systemPrompt` when present and non-empty,
    /// otherwise `default_system`.
    pub fn synthesize_messages(
        &self,
        feature: Feature,
        default_system: &str,
    ) -> Result<Vec<ChatMessage>, Error> {
        let turns = self.turns(feature)?;
        let system = self
            .system_prompt
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(default_system);

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage::new(Role::System, system));
        messages.extend(turns);
        Ok(messages)
    }
}

/// Chat-completion request body sent to the provider.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl UpstreamRequest {
    pub fn new(settings: &FeatureSettings, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: settings.model.clone(),
            messages,
            stream: settings.stream,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

/// Buffered chat-completion response from the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResponse {
    /// Text of the first choice. Decodes strictly first, then falls back to
    /// a JSON pointer lookup; anything missing yields an empty string.
    pub fn first_content(body: &serde_json::Value) -> String {
        if let Ok(strict) = serde_json::from_value::<CompletionResponse>(body.clone()) {
            if let Some(content) = strict
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
            {
                return content;
            }
        }

        body.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// One streamed `data:` frame from the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkFrame {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
}

/// Delta content in a streaming frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChunkFrame {
    /// Text of `choices[0].delta.content`, if any.
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
    }
}

/// Answer letter of a quiz option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OptionKey {
    A,
    B,
    C,
    D,
}

/// The four answer options of a question, keyed `A` to `D`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuizOptions {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

impl QuizOptions {
    pub fn get(&self, key: OptionKey) -> &str {
        match key {
            OptionKey::A => &self.a,
            OptionKey::B => &self.b,
            OptionKey::C => &self.c,
            OptionKey::D => &self.d,
        }
    }
}

/// A single multiple-choice question.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: QuizOptions,
    pub correct: OptionKey,
    pub explanation: String,
}

/// Structured quiz as requested from the model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuizPayload {
    pub questions: Vec<QuizQuestion>,
}

/// Number of questions the quiz prompt asks for.
pub const QUIZ_QUESTION_COUNT: usize = 5;

impl QuizPayload {
    /// Strict decode of a parsed quiz. Returns `None` unless the value has
    /// exactly five questions, each with options `A` to `D`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let payload: QuizPayload = serde_json::from_value(value.clone()).ok()?;
        (payload.questions.len() == QUIZ_QUESTION_COUNT).then_some(payload)
    }
}

/// Body of a quiz endpoint reply: `{"quiz": ...}` or `{"content": "..."}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizReply {
    /// Model output parsed as JSON.
    Quiz(serde_json::Value),
    /// Model output that was not valid JSON, returned unchanged.
    Content(String),
}

impl QuizReply {
    /// Typed quiz, when the parsed JSON matches the quiz schema.
    pub fn payload(&self) -> Option<QuizPayload> {
        match self {
            QuizReply::Quiz(value) => QuizPayload::from_value(value),
            QuizReply::Content(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_becomes_single_turn() {
        let req = ChatRequest::user("hello");
        let messages = req
            .synthesize_messages(Feature::Chat, "default prompt")
            .unwrap();
        assert_eq!(
            messages,
            vec![
                ChatMessage::new(Role::System, "default prompt"),
                ChatMessage::new(Role::User, "hello"),
            ]
        );
    }

    #[test]
    fn caller_system_prompt_replaces_default() {
        let req = ChatRequest::user("hi").with_system_prompt("Be brief.");
        let messages = req.synthesize_messages(Feature::Plan, "default").unwrap();
        assert_eq!(messages[0], ChatMessage::new(Role::System, "Be brief."));
    }

    #[test]
    fn empty_system_prompt_uses_default() {
        let req = ChatRequest::user("hi").with_system_prompt("");
        let messages = req.synthesize_messages(Feature::Chat, "default").unwrap();
        assert_eq!(messages[0].content, "default");
    }

    #[test]
    fn history_is_kept_in_order_after_system() {
        let history = vec![
            ChatMessage::new(Role::User, "first"),
            ChatMessage::new(Role::Assistant, "answer"),
            ChatMessage::new(Role::User, "second"),
        ];
        let req = ChatRequest::conversation(history.clone());
        let messages = req.synthesize_messages(Feature::Chat, "sys").unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(&messages[1..], &history[..]);
    }

    #[test]
    fn history_wins_over_user_message() {
        let req = ChatRequest {
            messages: Some(vec![ChatMessage::new(Role::User, "from history")]),
            user_message: Some("ignored".to_string()),
            ..Default::default()
        };
        let turns = req.turns(Feature::Chat).unwrap();
        assert_eq!(turns, vec![ChatMessage::new(Role::User, "from history")]);
    }

    #[test]
    fn empty_history_falls_back_to_user_message() {
        let req = ChatRequest {
            messages: Some(vec![]),
            user_message: Some("fallback".to_string()),
            ..Default::default()
        };
        let turns = req.turns(Feature::Chat).unwrap();
        assert_eq!(turns[0].content, "fallback");
    }

    #[test]
    fn missing_both_fields_is_rejected() {
        let err = ChatRequest::default().turns(Feature::Chat).unwrap_err();
        assert!(matches!(err, Error::BadRequest(ref m) if m == "messages or userMessage is required"));

        let empty = ChatRequest {
            messages: Some(vec![]),
            user_message: Some(String::new()),
            ..Default::default()
        };
        assert!(empty.turns(Feature::Plan).is_err());
    }

    #[test]
    fn quiz_requires_user_message() {
        let req = ChatRequest::conversation(vec![ChatMessage::new(Role::User, "x")]);
        let err = req.turns(Feature::Quiz).unwrap_err();
        assert!(matches!(err, Error::BadRequest(ref m) if m == "userMessage is required"));
    }

    #[test]
    fn request_uses_camel_case_on_the_wire() {
        let json = r#"{"systemPrompt":"s","userMessage":"u"}"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.system_prompt.as_deref(), Some("s"));
        assert_eq!(req.user_message.as_deref(), Some("u"));
    }

    #[test]
    fn unknown_role_fails_to_decode() {
        let json = r#"{"messages":[{"role":"tool","content":"x"}]}"#;
        assert!(serde_json::from_str::<ChatRequest>(json).is_err());
    }

    #[test]
    fn upstream_request_serializes_provider_fields() {
        let settings = FeatureSettings {
            system_prompt: "sys".to_string(),
            model: "m".to_string(),
            stream: true,
            max_tokens: 4096,
            temperature: 0.5,
        };
        let body = UpstreamRequest::new(&settings, vec![ChatMessage::new(Role::User, "hi")]);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn first_content_strict_and_permissive() {
        let strict = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(CompletionResponse::first_content(&strict), "hello");

        let missing = serde_json::json!({"choices": []});
        assert_eq!(CompletionResponse::first_content(&missing), "");

        let odd = serde_json::json!({"choices": [{"message": {"content": 42}}]});
        assert_eq!(CompletionResponse::first_content(&odd), "");
    }

    #[test]
    fn chunk_frame_delta_text() {
        let frame: ChunkFrame =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(frame.delta_text(), Some("Hi"));

        let role_only: ChunkFrame =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(role_only.delta_text(), None);
    }

    #[test]
    fn quiz_reply_serializes_externally_tagged() {
        let reply = QuizReply::Content("plain text".to_string());
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"content": "plain text"})
        );

        let reply = QuizReply::Quiz(serde_json::json!({"questions": []}));
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"quiz": {"questions": []}})
        );
    }

    #[test]
    fn quiz_payload_requires_five_questions() {
        let question = serde_json::json!({
            "question": "What does CTR stand for?",
            "options": {"A": "Click-through rate", "B": "Cost to reach", "C": "Conversion rate", "D": "Cart total"},
            "correct": "A",
            "explanation": "CTR is clicks divided by impressions."
        });
        let five = serde_json::json!({"questions": vec![question.clone(); 5]});
        let payload = QuizPayload::from_value(&five).unwrap();
        let first = &payload.questions[0];
        assert_eq!(first.correct, OptionKey::A);
        assert_eq!(first.options.get(first.correct), "Click-through rate");

        let two = serde_json::json!({"questions": vec![question; 2]});
        assert!(QuizPayload::from_value(&two).is_none());

        let three_options = serde_json::json!({"questions": vec![serde_json::json!({
            "question": "q",
            "options": {"A": "a", "B": "b", "C": "c"},
            "correct": "A",
            "explanation": "e"
        }); 5]});
        assert!(QuizPayload::from_value(&three_options).is_none());
    }
}
