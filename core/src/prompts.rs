//! Prompt construction for the tool lifecycle.
//!
//! Creation, repair, and improvement share one JSON response contract, so
//! a single parser handles all three. The sandbox rules are restated in
//! every system prompt; models drift without them.

use crate::tool::Tool;

/// Sandbox rules included in every system prompt.
const LUA_RULES: &str = r#"Rules for the Lua source:
- Define exactly one top-level function. Its name must match the "name" field you report.
- The function takes positional parameters only, in the order you list them.
- Return a JSON-representable value: number, string, boolean, nil, or a table of those.
- Use print() for diagnostics; the caller captures the output.
- Only the base, math, string, and table libraries exist. There is no io, no os, no require."#;

/// System prompt for creating a new tool.
pub const CREATE_SYSTEM: &str = r#"You write small Lua tools for an automated agent. A tool is a single self-contained Lua function.

Respond with ONLY a JSON object, no prose and no markdown fences, with these keys:
- "name": (string) the function name, snake_case.
- "description": (string) one or two sentences on what the tool does.
- "parameters": (array) one object per positional parameter: {"name": "...", "type_hint": "...", "description": "..."}.
- "source_code": (string) the complete Lua source for the function.

Example response:
{
  "name": "circle_area",
  "description": "Calculate the area of a circle given its radius.",
  "parameters": [
    {"name": "radius", "type_hint": "number", "description": "Radius of the circle."}
  ],
  "source_code": "function circle_area(radius)\n  return math.pi * radius * radius\nend"
}"#;

/// System prompt for repairing a broken tool.
pub const REPAIR_SYSTEM: &str = r#"You fix broken Lua tools for an automated agent. You get the tool's source and the error it produced; return a corrected version.

Keep the function name unchanged. Keep the signature compatible unless the error forces a change.

Respond with ONLY a JSON object, no prose and no markdown fences, with these keys:
- "name": (string) the original tool name.
- "description": (string) the original description, updated only if the fix changes behavior.
- "parameters": (array) one object per positional parameter: {"name": "...", "type_hint": "...", "description": "..."}.
- "source_code": (string) the complete corrected Lua source.
- "fix_explanation": (string) one sentence on what was wrong and what changed."#;

/// System prompt for user-directed improvement of a tool.
pub const IMPROVE_SYSTEM: &str = r#"You improve existing Lua tools for an automated agent on request. You get the tool's source and a change request; return the revised version.

Keep the function name unchanged. You may change the signature and description; report the new parameter list accurately.

Respond with ONLY a JSON object, no prose and no markdown fences, with these keys:
- "name": (string) the original tool name.
- "description": (string) the updated description.
- "parameters": (array) one object per positional parameter: {"name": "...", "type_hint": "...", "description": "..."}.
- "source_code": (string) the complete revised Lua source.
- "improvement_summary": (string) one sentence on what changed."#;

/// User prompt asking for a new tool, with up to a couple of similar
/// existing tools as context.
pub fn creation_prompt(task: &str, similar: &[&Tool]) -> String {
    let mut prompt = format!("Task:\n{task}\n\n{LUA_RULES}\n");

    if !similar.is_empty() {
        prompt.push_str(
            "\nExisting tools that may be close (borrow ideas, not code, unless the task is identical):\n",
        );
        for (i, tool) in similar.iter().enumerate() {
            prompt.push_str(&format!("{}. {}: {}\n", i + 1, tool.name, tool.description));
        }
    }

    prompt.push_str("\nCreate the tool now. Respond with only the JSON object.");
    prompt
}

/// User prompt asking for a fix to a tool that just failed.
pub fn repair_prompt(tool: &Tool, fault_summary: &str) -> String {
    let mut prompt = format!(
        "The tool below failed. Fix it.\n\n\
         Tool name: {}\n\
         Version: {}\n\
         Description: {}\n\
         Parameters:\n{}\n\n\
         Source:\n{}\n\n\
         Latest failure:\n{fault_summary}\n",
        tool.name,
        tool.version,
        tool.description,
        render_parameters(tool),
        tool.source_code,
    );

    // The latest failure is already shown above; list up to three before it.
    let earlier = &tool.error_log[..tool.error_log.len().saturating_sub(1)];
    if !earlier.is_empty() {
        prompt.push_str("\nEarlier failures:\n");
        for record in earlier.iter().rev().take(3).rev() {
            prompt.push_str(&format!("- v{}: {}\n", record.version, record.summary));
        }
    }

    prompt.push_str(&format!(
        "\n{LUA_RULES}\n\nRespond with only the JSON object."
    ));
    prompt
}

/// User prompt asking for a directed change to an existing tool.
pub fn improvement_prompt(tool: &Tool, instructions: &str) -> String {
    format!(
        "Revise the tool below.\n\n\
         Tool name: {}\n\
         Version: {}\n\
         Description: {}\n\
         Parameters:\n{}\n\n\
         Source:\n{}\n\n\
         Requested change:\n{instructions}\n\n\
         {LUA_RULES}\n\nRespond with only the JSON object.",
        tool.name,
        tool.version,
        tool.description,
        render_parameters(tool),
        tool.source_code,
    )
}

fn render_parameters(tool: &Tool) -> String {
    if tool.parameters.is_empty() {
        return "(none)".to_string();
    }

    tool.parameters
        .iter()
        .map(|parameter| {
            let type_hint = parameter.type_hint.as_deref().unwrap_or("any");
            match &parameter.description {
                Some(description) => format!("- {} ({type_hint}): {description}", parameter.name),
                None => format!("- {} ({type_hint})", parameter.name),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
