use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::registry::ToolDescriptor;

const SYSTEM_TEMPLATE_NAME: &str = "system.md";
const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

#[derive(Serialize)]
struct ToolContext<'a> {
    name: &'a str,
    description: &'a str,
    server: &'a str,
    schema: String,
}

#[derive(Serialize)]
struct SystemContext<'a> {
    instructions: &'a str,
    tools: Vec<ToolContext<'a>>,
}

fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(SYSTEM_TEMPLATE_NAME, SYSTEM_TEMPLATE)?;
    Ok(env)
}

/// Renders the system prompt: the caller's instructions followed by the tool catalog and
/// the format the model must use to request a tool call.
pub fn render_system_prompt(
    instructions: &str,
    tools: &[ToolDescriptor],
) -> Result<String, minijinja::Error> {
    let env = environment()?;
    let context = SystemContext {
        instructions: instructions.trim(),
        tools: tools
            .iter()
            .map(|tool| ToolContext {
                name: &tool.name,
                description: tool.description.trim(),
                server: &tool.server,
                schema: tool.input_schema.to_string(),
            })
            .collect(),
    };
    let rendered = env.get_template(SYSTEM_TEMPLATE_NAME)?.render(context)?;
    Ok(rendered.trim().to_string())
}
