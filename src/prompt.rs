//! Chat prompts, stored as TOML and filled in with Handlebars.

use handlebars::Handlebars;
use serde_json::Map;

use crate::prelude::*;

/// A JSON object, used for template bindings.
pub type JsonObject = Map<String, Value>;

/// Render a prompt as a JSON value, filling in template values for any string
/// fields.
pub trait RenderTemplate {
    type Output;

    /// Render the template.
    fn render_template(
        &self,
        handlebars: &Handlebars,
        bindings: &JsonObject,
    ) -> Result<Self::Output>;
}

/// A chat completion prompt.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatPrompt {
    /// The developer (aka "system") message, if any.
    pub developer: Option<String>,

    /// Messages.
    pub messages: Vec<Message>,
}

impl ChatPrompt {
    /// Parse a prompt from TOML source.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("failed to parse prompt")
    }

    /// Render the prompt as an OpenAI-style `messages` array.
    pub fn render_prompt(&self, bindings: &JsonObject) -> Result<Value> {
        let mut handlebars = Handlebars::new();
        // We're writing prompts, not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);
        self.render_template(&handlebars, bindings)
    }
}

impl RenderTemplate for ChatPrompt {
    type Output = Value;

    fn render_template(
        &self,
        handlebars: &Handlebars,
        bindings: &JsonObject,
    ) -> Result<Self::Output> {
        let mut messages = Vec::new();
        if let Some(developer) = &self.developer {
            messages.push(json!({
                "role": "system",
                "content": handlebars.render_template(developer, bindings)?,
            }));
        }
        for message in &self.messages {
            messages.extend(message.render_template(handlebars, bindings)?);
        }
        Ok(Value::Array(messages))
    }
}

/// A message, and optionally a response (represented as a JSON object).
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    /// The user message.
    pub user: String,

    /// Image URL templates attached to the user message. These usually
    /// render to `data:` URLs.
    #[serde(default)]
    pub images: Vec<String>,

    /// The assistant response (optional). This is always a JSON object.
    pub assistant: Option<JsonObject>,
}

impl RenderTemplate for Message {
    type Output = Vec<Value>;

    fn render_template(
        &self,
        handlebars: &Handlebars,
        bindings: &JsonObject,
    ) -> Result<Self::Output> {
        let user = handlebars.render_template(&self.user, bindings)?;
        let content = if self.images.is_empty() {
            Value::String(user)
        } else {
            let mut parts = vec![json!({ "type": "text", "text": user })];
            for image in &self.images {
                let url = handlebars.render_template(image, bindings)?;
                parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
            }
            Value::Array(parts)
        };
        let mut messages = vec![json!({ "role": "user", "content": content })];
        if let Some(assistant) = &self.assistant {
            let assistant = assistant.render_template(handlebars, bindings)?;
            messages
                .push(json!({ "role": "assistant", "content": assistant.to_string() }));
        }
        Ok(messages)
    }
}

impl RenderTemplate for Value {
    type Output = Value;

    fn render_template(
        &self,
        handlebars: &Handlebars,
        bindings: &JsonObject,
    ) -> Result<Self::Output> {
        match self {
            Value::String(s) => Ok(Value::String(handlebars.render_template(s, bindings)?)),
            Value::Object(obj) => obj.render_template(handlebars, bindings),
            Value::Array(arr) => arr
                .iter()
                .map(|value| value.render_template(handlebars, bindings))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            _ => Ok(self.clone()),
        }
    }
}

impl RenderTemplate for JsonObject {
    type Output = Value;

    fn render_template(
        &self,
        handlebars: &Handlebars,
        bindings: &JsonObject,
    ) -> Result<Self::Output> {
        let mut output = Map::new();
        for (key, value) in self {
            output.insert(key.clone(), value.render_template(handlebars, bindings)?);
        }
        Ok(Value::Object(output))
    }
}

/// Build template bindings from `(name, value)` pairs.
pub fn bindings<const N: usize>(pairs: [(&str, Value); N]) -> JsonObject {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = r#"
developer = "You help {{grade}} graders."

[[messages]]
user = "Read this: {{text}}"

[[messages]]
user = "And this picture."
images = ["{{url}}"]
assistant = { lines = ["{{text}}"] }
"#;

    #[test]
    fn renders_text_images_and_assistant_examples() {
        let prompt = ChatPrompt::from_toml(PROMPT).unwrap();
        let messages = prompt
            .render_prompt(&bindings([
                ("grade", json!(4)),
                ("text", json!("a < b & c")),
                ("url", json!("data:image/png;base64,AAAA")),
            ]))
            .unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You help 4 graders.");
        // No HTML escaping.
        assert_eq!(messages[1]["content"], "Read this: a < b & c");
        assert_eq!(messages[2]["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(messages[3]["role"], "assistant");
        assert_eq!(messages[3]["content"], r#"{"lines":["a < b & c"]}"#);
    }

    #[test]
    fn missing_bindings_are_errors() {
        let prompt = ChatPrompt::from_toml(PROMPT).unwrap();
        assert!(prompt.render_prompt(&bindings([("grade", json!(4))])).is_err());
    }
}
