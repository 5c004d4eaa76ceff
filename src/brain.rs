use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::PlanError;
use crate::types::{FormSection, PLANNER_MAX_CHARS};

/// Turns form sections (and optionally a screenshot) into raw action records.
/// Output is untyped; the sanitizer validates it.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        sections: &[FormSection],
        visual: Option<&Path>,
    ) -> Result<Vec<Value>, PlanError>;
}

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = r#"You are a form-filling assistant working through an online job application.
You receive extracted text sections of the current page. Interactive controls appear as placeholders:
  [INPUT: type=..., name=..., placeholder=..., value=...]   [TEXTAREA, name=...]
  [SELECT, name=..., options=...]   [BUTTON: text]
Identify every field that needs input, every option that must be chosen, and the button that advances the form (Next/Continue/Submit).

Respond ONLY with a JSON array of actions, in the order they should be performed. Each action is an object:
  "action":   "fill" | "click" | "upload"
  "selector": a CSS selector for the element (prefer [name="..."] attribute selectors), or an XPath starting with //
  "selector_type": "css" or "xpath"
  "field":    a short description of the field or button
  "value":    required for fill and upload

Use placeholders for personal data instead of inventing it: [NAME], [FIRST_NAME], [LAST_NAME], [EMAIL], [PHONE], [LOCATION].
For file uploads use [RESUME_PATH] for the resume and [COVER_LETTER_PATH] for the cover letter.
Choose to upload a new resume file rather than reusing a stored one. Skip optional fields you have no data for.
The last action should be the click that moves to the next step. Ensure the JSON is valid."#;

/// Planner backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiPlanner {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_chars: usize,
}

impl OpenAiPlanner {
    pub fn new(api_key: String, model: &str, endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            max_chars: PLANNER_MAX_CHARS,
        }
    }

    pub fn from_env(model: &str, endpoint: &str) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set in environment"))?;
        Ok(Self::new(api_key, model, endpoint))
    }

    async fn complete(&self, user_prompt: String, image: Option<&str>) -> Result<Vec<Value>, PlanError> {
        let user_content = match image {
            Some(data_url) => json!([
                {"type": "text", "text": user_prompt},
                {"type": "image_url", "image_url": {"url": data_url}},
            ]),
            None => json!(user_prompt),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user_content},
                ],
                "temperature": 0,
            }))
            .send()
            .await?;

        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let message = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error")
                .to_string();
            warn!(status = status.as_u16(), %message, "planner API error");
            return Err(PlanError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or(PlanError::EmptyReply)?;
        debug!(reply = content, "planner replied");

        parse_plan_reply(content)
    }
}

#[async_trait]
impl Planner for OpenAiPlanner {
    async fn plan(
        &self,
        sections: &[FormSection],
        visual: Option<&Path>,
    ) -> Result<Vec<Value>, PlanError> {
        let image = visual.and_then(load_image_data_url);

        let prompts = build_prompts(sections, self.max_chars);
        if prompts.len() > 1 {
            info!(sections = prompts.len(), "form is large; planning one section at a time");
        }

        let image = image.as_deref();
        let actions = plan_in_parts(prompts, move |prompt, whole_form| {
            // The screenshot only accompanies the whole-form prompt.
            self.complete(prompt, image.filter(|_| whole_form))
        })
        .await?;
        info!(actions = actions.len(), model = %self.model, "plan received");
        Ok(actions)
    }
}

/// Ask for each prompt in turn and concatenate the replies in prompt order.
/// `ask` is told whether its prompt covers the whole form. Any failed part
/// fails the plan.
async fn plan_in_parts<F, Fut>(prompts: Vec<String>, mut ask: F) -> Result<Vec<Value>, PlanError>
where
    F: FnMut(String, bool) -> Fut,
    Fut: Future<Output = Result<Vec<Value>, PlanError>>,
{
    let whole_form = prompts.len() == 1;
    let mut actions = Vec::new();
    for (idx, prompt) in prompts.into_iter().enumerate() {
        info!(part = idx + 1, chars = prompt.len(), "asking planner");
        actions.extend(ask(prompt, whole_form).await?);
    }
    Ok(actions)
}

/// One prompt for the whole form, or one per section when the combined
/// rendering exceeds `max_chars`.
pub fn build_prompts(sections: &[FormSection], max_chars: usize) -> Vec<String> {
    let rendered: Vec<String> = sections.iter().map(FormSection::render).collect();
    // Measured as the sections joined by blank lines.
    let combined: usize = rendered.iter().map(|s| s.chars().count()).sum::<usize>()
        + 2 * rendered.len().saturating_sub(1);

    if combined <= max_chars {
        let mut prompt = String::from("Extracted Form Sections:");
        for (i, section) in rendered.iter().enumerate() {
            prompt.push_str(&format!("\n\n--- Section {} ---\n{}", i + 1, section));
        }
        return vec![prompt];
    }

    let total = rendered.len();
    rendered
        .into_iter()
        .enumerate()
        .map(|(i, section)| {
            format!(
                "Section {} of {} of the form:\n{}\n\nProvide the JSON array of actions for just this section.",
                i + 1,
                total,
                section
            )
        })
        .collect()
}

/// Pull the action list out of a model reply: code fences and chatter around
/// the JSON are ignored; a bare array, `{"actions": [...]}` or a single action
/// object are all accepted.
pub fn parse_plan_reply(reply: &str) -> Result<Vec<Value>, PlanError> {
    let cleaned = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = match (cleaned.find('['), cleaned.find('{')) {
        (Some(a), Some(o)) => a.min(o),
        (Some(a), None) => a,
        (None, Some(o)) => o,
        (None, None) => return Err(PlanError::Parse("no JSON in reply".into())),
    };

    let mut stream = serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<Value>();
    let parsed = match stream.next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => return Err(PlanError::Parse(e.to_string())),
        None => return Err(PlanError::Parse("empty JSON".into())),
    };

    match parsed {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("actions") {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(PlanError::Parse(format!("'actions' is not a list: {other}"))),
            None => Ok(vec![Value::Object(map)]),
        },
        other => Err(PlanError::Parse(format!("unexpected JSON: {other}"))),
    }
}

fn load_image_data_url(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(format!("data:image/png;base64,{}", BASE64.encode(bytes))),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read screenshot; planning without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(title: &str, body: &str) -> FormSection {
        FormSection {
            title: Some(title.to_string()),
            body_text: body.to_string(),
        }
    }

    #[test]
    fn small_forms_get_one_prompt_in_section_order() {
        let sections = vec![section("Resumé", "[INPUT: type=file]"), section("Cover letter", "[BUTTON: Next]")];
        let prompts = build_prompts(&sections, 15_000);
        assert_eq!(prompts.len(), 1);
        let resume = prompts[0].find("--- Section 1 ---\nResumé:").unwrap();
        let cover = prompts[0].find("--- Section 2 ---\nCover letter:").unwrap();
        assert!(resume < cover);
    }

    #[test]
    fn oversized_forms_are_split_per_section() {
        let sections = vec![section("A", &"x".repeat(40)), section("B", &"y".repeat(40))];
        let prompts = build_prompts(&sections, 50);
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("Section 1 of 2"));
        assert!(prompts[1].contains(&"y".repeat(40)));
    }

    #[test]
    fn blank_line_separators_count_toward_the_limit() {
        // 2 x ("A:\n" + 22 chars) = 50, plus one "\n\n" between them.
        let sections = vec![section("A", &"x".repeat(22)), section("B", &"y".repeat(22))];
        assert_eq!(build_prompts(&sections, 52).len(), 1);
        assert_eq!(build_prompts(&sections, 51).len(), 2);
    }

    #[tokio::test]
    async fn parts_are_concatenated_in_section_order() {
        let sections = vec![section("A", &"x".repeat(40)), section("B", &"y".repeat(40))];
        let prompts = build_prompts(&sections, 50);
        let mut seen_whole_form = Vec::new();

        let actions = plan_in_parts(prompts, |prompt, whole_form| {
            seen_whole_form.push(whole_form);
            let selector = if prompt.starts_with("Section 1") { "#a" } else { "#b" };
            async move {
                Ok(vec![
                    json!({"action": "click", "selector": format!("{selector}-1")}),
                    json!({"action": "click", "selector": format!("{selector}-2")}),
                ])
            }
        })
        .await
        .unwrap();

        let selectors: Vec<&str> = actions.iter().map(|a| a["selector"].as_str().unwrap()).collect();
        assert_eq!(selectors, vec!["#a-1", "#a-2", "#b-1", "#b-2"]);
        assert_eq!(seen_whole_form, vec![false, false]);
    }

    #[tokio::test]
    async fn a_failed_part_fails_the_plan() {
        let prompts = vec!["Section 1 of 2".to_string(), "Section 2 of 2".to_string()];
        let result = plan_in_parts(prompts, |prompt, _| async move {
            if prompt.starts_with("Section 2") {
                Err(PlanError::EmptyReply)
            } else {
                Ok(vec![json!({"action": "click", "selector": "#a"})])
            }
        })
        .await;
        assert!(matches!(result, Err(PlanError::EmptyReply)));
    }

    #[test]
    fn replies_in_every_shape_parse() {
        let fenced = "```json\n[{\"action\":\"click\",\"selector\":\"#next\"}]\n```";
        assert_eq!(parse_plan_reply(fenced).unwrap().len(), 1);

        let wrapped = "Here is the plan: {\"actions\": [{\"action\":\"click\"}, {\"action\":\"fill\"}]} Good luck!";
        assert_eq!(parse_plan_reply(wrapped).unwrap().len(), 2);

        let single = "{\"action\":\"upload\",\"selector\":\"#cv\",\"value\":\"[RESUME_PATH]\"}";
        let parsed = parse_plan_reply(single).unwrap();
        assert_eq!(parsed[0]["action"], "upload");
    }

    #[test]
    fn non_json_replies_fail() {
        assert!(matches!(parse_plan_reply("I cannot help with that."), Err(PlanError::Parse(_))));
        assert!(matches!(parse_plan_reply("[{\"action\": "), Err(PlanError::Parse(_))));
    }
}
