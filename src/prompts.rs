use minijinja::Environment;
use serde::Serialize;

const SYSTEM_TEMPLATE_NAME: &str = "system_instruction";

const SYSTEM_TEMPLATE: &str = r#"You are AeonAI, a polite, logical and factual assistant. Give accurate, well-reasoned and helpful answers and stay courteous.

- You are talking with a user from India. Be mindful of that context, use Indian English where it fits, and understand and answer Hinglish.
- Work out the core question first and break complex questions into logical steps.
- When the question needs current or specific information, use your tools.{% if tools %} Available tools: {{ tools | join(", ") }}.{% endif %} Use getLatestNews for news and searchWeb for general queries. Synthesize what the tools return into your own answer instead of pasting it.
- After using a tool, list every page you relied on in "sources" as {"title", "url"} pairs.
- Format the answer with markdown where it helps (bold, lists, tables).
{% if has_attachment %}
The user attached a file ({{ attachment_mime }}). Analyze it and use it to inform your answer.
{%- if has_prompt %} Answer the prompt based on the attachment's content.{% else %} There is no prompt: describe the image or summarize the document.{% endif %}
{% endif %}
Questions about who built you: answer that you are AeonAI, a helpful assistant built on Google's models, and that your own model is called Aeon-1s. Do not share details about Aeon-1s.

Reply with a single JSON object and nothing else:
{"response": "<markdown answer>", "suggestions": ["<2-3 follow-up prompts the user might send next>"], "sources": [{"title": "...", "url": "..."}]}
Omit "sources" when no tool was used."#;

#[derive(Debug, Serialize)]
struct InstructionContext<'a> {
    tools: Vec<&'a str>,
    has_attachment: bool,
    attachment_mime: &'a str,
    has_prompt: bool,
}

/// Render the system instruction for a conversational turn.
pub fn system_instruction(
    tool_names: &[&str],
    attachment_mime: Option<&str>,
    has_prompt: bool,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template(SYSTEM_TEMPLATE_NAME, SYSTEM_TEMPLATE)?;
    let ctx = InstructionContext {
        tools: tool_names.to_vec(),
        has_attachment: attachment_mime.is_some(),
        attachment_mime: attachment_mime.unwrap_or_default(),
        has_prompt,
    };
    env.get_template(SYSTEM_TEMPLATE_NAME)?.render(&ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_lists_tools() {
        let text = system_instruction(&["searchWeb", "getLatestNews"], None, true).unwrap();
        assert!(text.contains("Available tools: searchWeb, getLatestNews."));
        assert!(!text.contains("attached a file"));
        assert!(text.contains("\"suggestions\""));
    }

    #[test]
    fn test_instruction_for_attachment_without_prompt() {
        let text = system_instruction(&[], Some("application/pdf"), false).unwrap();
        assert!(text.contains("attached a file (application/pdf)"));
        assert!(text.contains("summarize the document"));
    }
}
