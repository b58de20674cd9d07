use crate::extract::prompts::{PromptTemplates, expected_category};
use crate::extract::{ExtractError, ExtractionResult, Extractor};
use crate::items::ContextSource;
use crate::source::Message;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You extract structured information from group chat messages. \
Always answer with a single valid JSON object in the requested format.";

/// Extraction backed by an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct ChatExtractor {
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    templates: PromptTemplates,
    context: Option<Arc<dyn ContextSource>>,
    client: Client,
}

impl ChatExtractor {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        model: impl Into<String>,
        templates: PromptTemplates,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.into(),
            max_tokens: 5000,
            temperature: 0.7,
            templates,
            context: None,
            client: Client::new(),
        }
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Items from `source` are listed in every prompt as already recorded.
    pub fn with_context_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context = Some(source);
        self
    }

    /// A context read failure is logged and the prompt goes out without context.
    async fn context_items(&self, prompt_type: &str, today: NaiveDate) -> String {
        let Some(source) = &self.context else {
            return format_context_items(&[]);
        };
        match source.active_items(prompt_type, today).await {
            Ok(items) => format_context_items(&items),
            Err(err) => {
                warn!(prompt_type, "failed to read context items: {err:#}");
                format_context_items(&[])
            }
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, ExtractError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
        });

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Provider(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExtractError::Provider(format!("unreadable response: {e}")))?;
        if !status.is_success() {
            return Err(ExtractError::Provider(format!("{status}: {payload}")));
        }

        payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| ExtractError::Provider("response has no message content".to_string()))
    }
}

pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|msg| {
            let when = msg
                .timestamp
                .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
                .map(|dt| {
                    dt.with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                })
                .unwrap_or_else(|| "unknown time".to_string());
            match msg.sender.as_deref().filter(|s| !s.is_empty()) {
                Some(sender) => format!("[{when}] {sender}: {}", msg.text),
                None => format!("[{when}] {}", msg.text),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_context_items(items: &[Value]) -> String {
    if items.is_empty() {
        return "No active items found.".to_string();
    }
    let mut lines = vec!["Active items for context:".to_string()];
    for item in items {
        let Some(title) = item.get("title").and_then(Value::as_str) else {
            continue;
        };
        lines.push(format!("- {title}"));
        for (key, label) in [
            ("description", "Description"),
            ("due_date", "Due"),
            ("date", "Date"),
            ("start_time", "Starts"),
            ("priority", "Priority"),
        ] {
            if let Some(value) = item.get(key).and_then(Value::as_str).filter(|v| !v.is_empty()) {
                lines.push(format!("  {label}: {value}"));
            }
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Parses the model reply and checks it carries the list expected for `prompt_type`.
pub fn parse_reply(prompt_type: &str, raw: &str) -> Result<ExtractionResult, ExtractError> {
    let value: Value = serde_json::from_str(raw.trim())?;
    let Value::Object(fields) = value else {
        return Err(ExtractError::UnexpectedShape {
            prompt_type: prompt_type.to_string(),
            field: "object".to_string(),
        });
    };

    if let Some(field) = expected_category(prompt_type)
        && !matches!(fields.get(field), Some(Value::Array(_)))
    {
        return Err(ExtractError::UnexpectedShape {
            prompt_type: prompt_type.to_string(),
            field: field.to_string(),
        });
    }

    let categories = fields
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::Array(items) => Some((name, items)),
            _ => None,
        })
        .collect();
    Ok(ExtractionResult { categories })
}

#[async_trait]
impl Extractor for ChatExtractor {
    async fn extract(
        &self,
        messages: &[Message],
        prompt_type: &str,
    ) -> Result<ExtractionResult, ExtractError> {
        if !self.templates.contains(prompt_type) {
            return Err(ExtractError::UnknownPromptType(prompt_type.to_string()));
        }
        if self.api_key.is_empty() {
            return Err(ExtractError::MissingApiKey);
        }

        let now = Local::now();
        let context = self.context_items(prompt_type, now.date_naive()).await;
        let prompt = self
            .templates
            .render(
                prompt_type,
                &format_messages(messages),
                &context,
                &now.format("%Y-%m-%d").to_string(),
            )
            .ok_or_else(|| ExtractError::UnknownPromptType(prompt_type.to_string()))?;

        info!(
            prompt_type,
            messages = messages.len(),
            model = %self.model,
            "requesting extraction"
        );
        let raw = self.complete(prompt).await?;
        debug!(prompt_type, reply = %raw, "model reply");
        let result = parse_reply(prompt_type, &raw)?;
        info!(prompt_type, items = result.item_count(), "extraction finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tiny_http::{Response, Server};

    fn fake_completions(reply: Value) -> (String, std::thread::JoinHandle<Value>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = std::thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).unwrap();
            request
                .respond(Response::from_string(reply.to_string()))
                .unwrap();
            serde_json::from_str(&body).unwrap()
        });
        (format!("http://{addr}/v1"), handle)
    }

    #[test]
    fn format_messages_includes_sender_when_known() {
        let mut with_sender = Message::new("bring cake");
        with_sender.sender = Some("Dana".to_string());
        let bare = Message::new("no school friday");
        let text = format_messages(&[with_sender, bare]);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "[unknown time] Dana: bring cake");
        assert_eq!(lines[1], "[unknown time] no school friday");
    }

    #[test]
    fn parse_reply_validates_expected_category() {
        let ok = parse_reply("todo", r#" {"todos": [{"title": "a"}], "note": "x"} "#);
        assert!(matches!(ok, Ok(ref r) if r.item_count() == 1 && r.categories.len() == 1));

        let missing = parse_reply("todo", r#"{"items": []}"#);
        assert!(matches!(
            missing,
            Err(ExtractError::UnexpectedShape { ref field, .. }) if field == "todos"
        ));

        let wrong_type = parse_reply("calendar", r#"{"events": "tomorrow"}"#);
        assert!(matches!(wrong_type, Err(ExtractError::UnexpectedShape { .. })));

        assert!(matches!(
            parse_reply("general", "not json"),
            Err(ExtractError::InvalidJson(_))
        ));
    }

    #[test]
    fn custom_prompt_types_keep_every_list() {
        let result = parse_reply("shopping", r#"{"groceries": [1, 2], "stores": ["a"]}"#);
        assert!(matches!(result, Ok(ref r) if r.item_count() == 3));
    }

    #[tokio::test]
    async fn extract_calls_chat_completions() -> anyhow::Result<()> {
        let (base, server) = fake_completions(json!({
            "choices": [{ "message": { "content": "{\"events\": [{\"title\": \"trip\"}]}" } }]
        }));
        let extractor = ChatExtractor::new("key", Some(base), "test-model", PromptTemplates::default())
            .with_sampling(100, 0.0);

        let result = extractor
            .extract(&[Message::new("trip on monday")], "calendar")
            .await?;
        assert_eq!(result.item_count(), 1);

        let request = server.join().unwrap();
        assert_eq!(request["model"], "test-model");
        assert_eq!(request["response_format"]["type"], "json_object");
        let prompt = request["messages"][1]["content"].as_str().unwrap_or_default();
        assert!(prompt.contains("trip on monday"));
        Ok(())
    }

    struct FixedContext(Vec<Value>);

    #[async_trait]
    impl ContextSource for FixedContext {
        async fn active_items(
            &self,
            _prompt_type: &str,
            _today: NaiveDate,
        ) -> anyhow::Result<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn context_items_list_titles_with_details() {
        assert_eq!(format_context_items(&[]), "No active items found.");
        let text = format_context_items(&[
            json!({"title": "pay trip", "due_date": "2024-05-12", "priority": "high"}),
            json!({"note": "untitled items are left out"}),
        ]);
        assert_eq!(
            text,
            "Active items for context:\n- pay trip\n  Due: 2024-05-12\n  Priority: high\n"
        );
    }

    #[tokio::test]
    async fn active_items_are_sent_with_the_prompt() -> anyhow::Result<()> {
        let (base, server) = fake_completions(json!({
            "choices": [{ "message": { "content": "{\"todos\": []}" } }]
        }));
        let context = FixedContext(vec![json!({"title": "pay for the class trip"})]);
        let extractor = ChatExtractor::new("key", Some(base), "m", PromptTemplates::default())
            .with_context_source(Arc::new(context));

        let result = extractor.extract(&[Message::new("reminder")], "todo").await?;
        assert!(result.is_empty());

        let request = server.join().unwrap();
        let prompt = request["messages"][1]["content"].as_str().unwrap_or_default();
        assert!(prompt.contains("Active items for context:\n- pay for the class trip"));
        assert!(prompt.contains("reminder"));
        Ok(())
    }

    #[tokio::test]
    async fn prompt_without_context_source_says_so() -> anyhow::Result<()> {
        let (base, server) = fake_completions(json!({
            "choices": [{ "message": { "content": "{\"items\": []}" } }]
        }));
        let extractor = ChatExtractor::new("key", Some(base), "m", PromptTemplates::default());
        extractor.extract(&[Message::new("hello")], "general").await?;

        let request = server.join().unwrap();
        let prompt = request["messages"][1]["content"].as_str().unwrap_or_default();
        assert!(prompt.contains("No active items found."));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_prompt_and_missing_key_fail_before_any_request() {
        let extractor = ChatExtractor::new("", None, "m", PromptTemplates::default());
        let messages = [Message::new("x")];
        assert!(matches!(
            extractor.extract(&messages, "poetry").await,
            Err(ExtractError::UnknownPromptType(_))
        ));
        assert!(matches!(
            extractor.extract(&messages, "todo").await,
            Err(ExtractError::MissingApiKey)
        ));
    }
}
