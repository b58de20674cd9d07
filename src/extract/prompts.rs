use std::collections::HashMap;

const TODO_TEMPLATE: &str = r#"Today is {today}.
Read the chat messages below and list every task someone is expected to do.
Answer with a JSON object of the form
{"todos": [{"title": "", "description": "", "due_date": "YYYY-MM-DD or null", "priority": "high|medium|low", "assigned_to": "", "source_message": ""}]}
Use an empty list when there is nothing to do.

Already recorded, do not list these again:
{context_items}

Messages:
{messages}"#;

const CALENDAR_TEMPLATE: &str = r#"Today is {today}.
Read the chat messages below and list every dated event, meeting or deadline.
Answer with a JSON object of the form
{"events": [{"title": "", "date": "YYYY-MM-DD", "time": "HH:MM or null", "location": "", "description": "", "source_message": ""}]}
Use an empty list when nothing is scheduled.

Already recorded, do not list these again:
{context_items}

Messages:
{messages}"#;

const GENERAL_TEMPLATE: &str = r#"Today is {today}.
Read the chat messages below and list announcements or notices worth keeping.
Answer with a JSON object of the form
{"items": [{"title": "", "description": "", "source_message": ""}]}
Use an empty list when there is nothing noteworthy.

Already recorded, do not list these again:
{context_items}

Messages:
{messages}"#;

/// Category each built-in prompt type must return.
pub fn expected_category(prompt_type: &str) -> Option<&'static str> {
    match prompt_type {
        "todo" => Some("todos"),
        "calendar" => Some("events"),
        "general" => Some("items"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let templates = [
            ("todo", TODO_TEMPLATE),
            ("calendar", CALENDAR_TEMPLATE),
            ("general", GENERAL_TEMPLATE),
        ]
        .into_iter()
        .map(|(name, text)| (name.to_string(), text.to_string()))
        .collect();
        Self { templates }
    }
}

impl PromptTemplates {
    /// Built-ins overlaid with `overrides`, which may also add new prompt types.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut out = Self::default();
        for (name, text) in overrides {
            out.templates.insert(name.clone(), text.clone());
        }
        out
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.templates.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, prompt_type: &str) -> bool {
        self.templates.contains_key(prompt_type)
    }

    /// Fills `{today}`, `{context_items}` and `{messages}`. Templates may omit any of them.
    pub fn render(
        &self,
        prompt_type: &str,
        messages: &str,
        context_items: &str,
        today: &str,
    ) -> Option<String> {
        let template = self.templates.get(prompt_type)?;
        Some(
            template
                .replace("{today}", today)
                .replace("{context_items}", context_items)
                .replace("{messages}", messages),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_placeholders_and_keeps_json_braces() {
        let templates = PromptTemplates::default();
        let prompt = templates
            .render(
                "todo",
                "[2024-05-01 08:00:00] Dana: bring cake",
                "- pay for trip",
                "2024-05-01",
            )
            .unwrap_or_default();
        assert!(prompt.starts_with("Today is 2024-05-01."));
        assert!(prompt.contains("Dana: bring cake"));
        assert!(prompt.contains("do not list these again:\n- pay for trip\n"));
        assert!(prompt.contains(r#"{"todos": ["#));
        assert!(!prompt.contains("{context_items}"));
        assert!(templates.render("poetry", "", "", "").is_none());
        assert!(templates.contains("general"));
        assert!(!templates.contains("poetry"));
    }

    #[test]
    fn overrides_replace_and_extend() {
        let overrides = HashMap::from([
            ("todo".to_string(), "T {messages}".to_string()),
            ("shopping".to_string(), "S {messages}".to_string()),
        ]);
        let templates = PromptTemplates::with_overrides(&overrides);
        assert_eq!(templates.render("todo", "m", "ctx", "d").as_deref(), Some("T m"));
        assert_eq!(
            templates.names(),
            vec!["calendar", "general", "shopping", "todo"]
        );
        assert_eq!(expected_category("shopping"), None);
        assert_eq!(expected_category("calendar"), Some("events"));
    }
}
