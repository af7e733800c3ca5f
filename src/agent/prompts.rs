use chrono::Utc;

/// Instructions for the intent classifier. The model must answer with a single
/// JSON object so the decision never depends on sniffing free text.
pub fn intent_prompt() -> String {
    format!(
        r#"You are a data analyst helping a user plan a Jupyter notebook.

Work out what the user wants the notebook to do. Break the request into concrete
steps in plain language (no code, no tool calls) and confirm the plan with the
user before anything is built.

Answer with exactly one JSON object and nothing else:
{{"decision": "clarify" | "handoff" | "chat", "reply": "<text shown to the user>", "intent": "<condensed task description>"}}

- "clarify": the request is not yet actionable, or the plan has not been confirmed.
  Put your paraphrase of the plan or your question in "reply". Leave "intent" empty.
- "handoff": the user has confirmed a concrete plan. "reply" is a short acknowledgement.
  "intent" is a self-contained description of the notebook to build, written for a
  programmer who has not seen this conversation.
- "chat": the message is conversational and not about building a notebook.
  Answer it in "reply". Leave "intent" empty.

System time: {}"#,
        Utc::now().to_rfc3339()
    )
}

/// Instructions for the code-writing step.
pub fn generation_prompt(kernel_language: &str, notebook_name: Option<&str>) -> String {
    let target = match notebook_name {
        Some(name) => format!(
            "The current notebook is `{}`. Edit it with add_cell, update_cell or delete_cell \
             when the task is a change to that notebook; otherwise create a new one.",
            name
        ),
        None => "No notebook exists yet for this conversation; start with create_notebook.".to_string(),
    };

    format!(
        r#"You are an expert programmer who builds Jupyter notebooks by calling tools.

Kernel: {kernel}. Write every code cell for this kernel.
{target}

Rules:
- Respond only with tool calls. Do not paste code into the reply text.
- create_notebook takes a complete nbformat 4 document in `notebook`; give every cell an `id`.
- Finish with run_cells so the executor validates the notebook. An empty `cells`
  list runs every cell with pending updates.
- Prefer small, focused cells with a markdown cell explaining each step.

System time: {time}"#,
        kernel = kernel_language,
        target = target,
        time = Utc::now().to_rfc3339()
    )
}

/// Retry note appended when a generation attempt proposed no usable tool call.
pub fn no_tool_call_note(attempt: u32, max_attempts: u32) -> String {
    format!(
        "Developer note: attempt {} of {} produced no tool calls. You must call \
         create_notebook (or an edit tool) and then run_cells. Do not answer in prose.",
        attempt, max_attempts
    )
}

/// Renders prior-notebook excerpts as read-only context.
pub fn references_block(references: &[String]) -> Option<String> {
    let excerpts: Vec<&str> = references
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect();
    if excerpts.is_empty() {
        return None;
    }

    let mut block = String::from(
        "Reference excerpts from the user's earlier notebooks (read-only, for context):\n",
    );
    for (index, excerpt) in excerpts.iter().enumerate() {
        block.push_str(&format!("\n[{}]\n{}\n", index + 1, excerpt));
    }
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_prompt_names_kernel_and_notebook() {
        let prompt = generation_prompt("ir", Some("sales_0a1b"));
        assert!(prompt.contains("Kernel: ir."));
        assert!(prompt.contains("`sales_0a1b`"));
    }

    #[test]
    fn blank_references_render_nothing() {
        assert!(references_block(&["  ".to_string()]).is_none());
        let block = references_block(&["import pandas".to_string()]).unwrap();
        assert!(block.contains("[1]\nimport pandas"));
    }
}
