//! System prompts and worker prompt assembly.

use crate::llm::{PromptPart, ReferenceFile};
use crate::tools::ToolRegistry;

use super::ledger::ExecutionLedger;

/// Build the planner persona.
pub fn build_planner_prompt(tools: &ToolRegistry) -> String {
    format!(
        r#"You are a planning agent. Decompose the user's goal into a short, ordered list of sequential sub-tasks that a worker agent will execute one at a time.

## Worker Capabilities

The worker can use these tools:
{tool_descriptions}

## Rules

1. **Sequential** - Each sub-task runs after the previous one and can see its result. Do not plan parallel work.

2. **Self-contained** - Write each sub-task as a concrete instruction the worker can carry out on its own.

3. **Caching** - If large or repeatedly used reference files are involved, the FIRST sub-task MUST create a content cache from them with `create_cache` and answer with only the cache identifier. Later sub-tasks consume that cache instead of the raw files.

4. **Outputs** - Deliverables must be written with `save_file` or `generate_image`; say so in the sub-task that produces them.

5. **Brevity** - Prefer the fewest sub-tasks that fully achieve the goal.

## Response Format

Respond with a JSON array of strings, one string per sub-task, in execution order. No other text."#,
        tool_descriptions = describe_tools(tools)
    )
}

/// Build the worker persona.
pub fn build_worker_prompt(tools: &ToolRegistry) -> String {
    format!(
        r#"You are a worker agent executing one step of a larger plan. You see the overall goal, the results of the steps already completed, and the reference files available.

## Your Capabilities

You have access to the following tools:
{tool_descriptions}

## Rules and Guidelines

1. **Use tools for side effects** - Files must be written with `save_file`, images with `generate_image`. Never paste a whole file into your answer instead of saving it.

2. **Build on prior results** - Reuse what earlier steps produced; do not redo their work.

3. **Caches** - When you create a cache, answer with only the cache identifier (it starts with `cachedContents/`) so the next step can use it.

4. **Handle tool errors** - A tool result starting with "Error" means the call failed. Fix the arguments and retry, or explain the problem.

5. **Stay focused** - Do only the current step.

## Response Format

Finish with a concise answer describing what this step produced."#,
        tool_descriptions = describe_tools(tools)
    )
}

fn describe_tools(tools: &ToolRegistry) -> String {
    tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt parts for one sub-task, in transmission order.
///
/// Raw file handles are appended only when `attach_files` is set, i.e. when
/// no content cache carries them already.
pub fn build_task_parts(
    goal: &str,
    sub_task: &str,
    prior: &ExecutionLedger,
    references: &[ReferenceFile],
    attach_files: bool,
) -> Vec<PromptPart> {
    let reference_line = if references.is_empty() {
        "Reference files: none.".to_string()
    } else {
        let listed = references
            .iter()
            .map(|f| format!("{} (ID: {})", f.display_name, f.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("Reference files: {}.", listed)
    };

    let mut parts = vec![
        PromptPart::text(format!("Results of previous steps: {}", prior.render_context())),
        PromptPart::text(reference_line),
        PromptPart::text(format!("Overall goal: {}", goal)),
        PromptPart::text(format!("Current sub-task: {}", sub_task)),
        PromptPart::text(
            "Think step by step, then complete the current sub-task, using the tools where needed.",
        ),
    ];

    if attach_files {
        parts.extend(references.iter().cloned().map(PromptPart::File));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ledger::SubTaskResult;
    use crate::testing::reference_file;

    #[test]
    fn planner_prompt_demands_cache_first() {
        let prompt = build_planner_prompt(&ToolRegistry::new());
        assert!(prompt.contains("FIRST sub-task MUST create a content cache"));
        assert!(prompt.contains("JSON array of strings"));
    }

    #[test]
    fn worker_prompt_lists_tools() {
        let mut tools = ToolRegistry::new();
        tools.register(crate::tools::SaveFile);
        let prompt = build_worker_prompt(&tools);
        assert!(prompt.contains("- **save_file**: Save text content"));
    }

    #[test]
    fn task_parts_follow_fixed_order() {
        let mut prior = ExecutionLedger::new();
        prior.record("step one", SubTaskResult::completed("done", None));
        let refs = vec![reference_file("a1", "a.txt")];

        let parts = build_task_parts("the goal", "step two", &prior, &refs, true);
        assert_eq!(parts.len(), 6);
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(texts[0].starts_with("Results of previous steps: [{"));
        assert_eq!(texts[1], "Reference files: a.txt (ID: files/a1).");
        assert_eq!(texts[2], "Overall goal: the goal");
        assert_eq!(texts[3], "Current sub-task: step two");
        assert!(texts[4].contains("step by step"));
        assert_eq!(parts[5], PromptPart::File(refs[0].clone()));
    }

    #[test]
    fn files_are_omitted_when_not_attached() {
        let refs = vec![reference_file("a1", "a.txt")];
        let parts = build_task_parts("g", "s", &ExecutionLedger::new(), &refs, false);
        assert_eq!(parts.len(), 5);
        assert!(!parts.iter().any(|p| matches!(p, PromptPart::File(_))));
    }
}
