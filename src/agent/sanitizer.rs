use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::shared::models::constants::TOOL_RUN_CELLS;
use crate::shared::models::Message;

/// Output representations kept in stored run reports.
pub const SUPPORTED_MIME_TYPES: [&str; 4] =
    ["text/plain", "text/markdown", "text/latex", "application/json"];

// CSI sequences, OSC sequences (BEL or ST terminated) and two-byte escapes
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ANSI escape pattern is valid")
});

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Tool-result content, typed by the capability that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Generic(String),
    NotebookRunReport(Value),
}

impl ToolResult {
    /// Selects the variant by capability name. A run result that is not a
    /// JSON object is kept as text, with escapes stripped.
    pub fn from_tool(tool_name: &str, content: &str) -> Self {
        if tool_name != TOOL_RUN_CELLS {
            return ToolResult::Generic(content.to_string());
        }
        match serde_json::from_str::<Value>(content) {
            Ok(report @ Value::Object(_)) => ToolResult::NotebookRunReport(report),
            _ => ToolResult::Generic(strip_ansi(content)),
        }
    }

    /// Returns a copy fit for history. Idempotent.
    pub fn sanitized(self) -> Self {
        match self {
            ToolResult::NotebookRunReport(mut report) => {
                if let Some(cells) = cells_mut(&mut report) {
                    for cell in cells.iter_mut() {
                        sanitize_cell(cell);
                    }
                }
                ToolResult::NotebookRunReport(report)
            }
            generic => generic,
        }
    }

    pub fn into_content(self) -> String {
        match self {
            ToolResult::Generic(text) => text,
            ToolResult::NotebookRunReport(report) => report.to_string(),
        }
    }

    /// First error output in the report, as `ename: evalue`.
    pub fn first_error(&self) -> Option<String> {
        let ToolResult::NotebookRunReport(report) = self else {
            return None;
        };
        cells(report)?
            .iter()
            .flat_map(|cell| outputs(cell).iter())
            .find(|out| out.get("output_type").and_then(Value::as_str) == Some("error"))
            .map(|out| {
                let name = out.get("ename").and_then(Value::as_str).unwrap_or("Error");
                let value = out.get("evalue").and_then(Value::as_str).unwrap_or("");
                if value.is_empty() {
                    name.to_string()
                } else {
                    format!("{}: {}", name, value)
                }
            })
    }

    /// Counts of (code cells, code cells that produced output).
    pub fn cell_counts(&self) -> Option<(usize, usize)> {
        let ToolResult::NotebookRunReport(report) = self else {
            return None;
        };
        let code: Vec<&Value> = cells(report)?
            .iter()
            .filter(|c| c.get("cell_type").and_then(Value::as_str).unwrap_or("code") == "code")
            .collect();
        let with_output = code.iter().filter(|c| !outputs(c).is_empty()).count();
        Some((code.len(), with_output))
    }
}

fn cells(report: &Value) -> Option<&Vec<Value>> {
    ["/Content/cells", "/content/cells", "/cells"]
        .iter()
        .find_map(|ptr| report.pointer(ptr).and_then(Value::as_array))
}

fn cells_mut(report: &mut Value) -> Option<&mut Vec<Value>> {
    let ptr = ["/Content/cells", "/content/cells", "/cells"]
        .into_iter()
        .find(|ptr| report.pointer(ptr).map(Value::is_array).unwrap_or(false))?;
    report.pointer_mut(ptr).and_then(Value::as_array_mut)
}

fn outputs(cell: &Value) -> &[Value] {
    cell.get("outputs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn sanitize_cell(cell: &mut Value) {
    let Some(outputs) = cell.get_mut("outputs").and_then(Value::as_array_mut) else {
        return;
    };
    for output in outputs.iter_mut() {
        let Some(obj) = output.as_object_mut() else {
            continue;
        };
        if let Some(text) = obj.get_mut("text") {
            strip_text_value(text);
        }
        if let Some(evalue) = obj.get_mut("evalue") {
            strip_text_value(evalue);
        }
        if let Some(traceback) = obj.get_mut("traceback") {
            strip_text_value(traceback);
        }
        if let Some(data) = obj.get_mut("data") {
            filter_mime_bundle(data);
        }
    }
}

// Notebook text fields are either a string or a list of line strings
fn strip_text_value(value: &mut Value) {
    match value {
        Value::String(text) => *text = strip_ansi(text),
        Value::Array(lines) => {
            for line in lines.iter_mut() {
                if let Value::String(text) = line {
                    *text = strip_ansi(text);
                }
            }
        }
        _ => {}
    }
}

fn filter_mime_bundle(data: &mut Value) {
    let Some(bundle) = data.as_object_mut() else {
        return;
    };
    let kept: Map<String, Value> = std::mem::take(bundle)
        .into_iter()
        .filter(|(mime, _)| SUPPORTED_MIME_TYPES.contains(&mime.as_str()))
        .collect();
    *bundle = kept;
    if let Some(plain) = bundle.get_mut("text/plain") {
        strip_text_value(plain);
    }
}

/// Collapses every run-capability tool result except the latest to its bare
/// status string. Identity, correlation id and ordering are preserved.
/// Returns how many messages were rewritten.
pub fn compact_history(messages: &mut [Message]) -> usize {
    let run_results: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter_map(|(index, m)| match m {
            Message::Tool { tool_name, .. } if tool_name == TOOL_RUN_CELLS => Some(index),
            _ => None,
        })
        .collect();

    let Some((_latest, older)) = run_results.split_last() else {
        return 0;
    };

    let mut rewritten = 0;
    for &index in older {
        if let Message::Tool {
            content, status, ..
        } = &mut messages[index]
        {
            if content.as_str() != status.as_str() {
                *content = status.as_str().to_string();
                rewritten += 1;
            }
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ToolStatus;
    use serde_json::json;

    fn report() -> Value {
        json!({
            "Content": {
                "cells": [
                    {
                        "cell_type": "code",
                        "id": "c1",
                        "outputs": [
                            {"output_type": "stream", "name": "stdout", "text": ["\u{1b}[31mred\u{1b}[0m\n", "plain"]},
                            {"output_type": "display_data", "data": {
                                "image/png": "iVBORw0KGgo=",
                                "text/html": "<b>x</b>",
                                "text/plain": "\u{1b}[1m<Figure>\u{1b}[0m"
                            }}
                        ]
                    },
                    {
                        "cell_type": "code",
                        "id": "c2",
                        "outputs": [
                            {"output_type": "error", "ename": "ValueError", "evalue": "\u{1b}[0;31mbad\u{1b}[0m",
                             "traceback": ["\u{1b}[0;31m---\u{1b}[0m", "ValueError: bad"]}
                        ]
                    },
                    {"cell_type": "markdown", "id": "m1", "source": "# Title"}
                ]
            }
        })
    }

    #[test]
    fn strips_csi_and_osc_sequences() {
        assert_eq!(strip_ansi("\u{1b}[1;32mok\u{1b}[0m"), "ok");
        assert_eq!(strip_ansi("\u{1b}]0;title\u{7}done"), "done");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }

    #[test]
    fn run_report_is_cleaned_and_filtered() {
        let result = ToolResult::from_tool("run_cells", &report().to_string()).sanitized();
        let ToolResult::NotebookRunReport(clean) = &result else {
            panic!("expected a run report");
        };

        let outputs = &clean["Content"]["cells"][0]["outputs"];
        assert_eq!(outputs[0]["text"], json!(["red\n", "plain"]));
        let data = outputs[1]["data"].as_object().unwrap();
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["text/plain"]);
        assert_eq!(data["text/plain"], "<Figure>");

        let error = &clean["Content"]["cells"][1]["outputs"][0];
        assert_eq!(error["evalue"], "bad");
        assert_eq!(error["traceback"][0], "---");

        assert!(!result.clone().into_content().contains('\u{1b}'));
    }

    #[test]
    fn sanitizing_twice_is_a_no_op() {
        let once = ToolResult::from_tool("run_cells", &report().to_string()).sanitized();
        let twice = once.clone().sanitized();
        assert_eq!(once, twice);
    }

    #[test]
    fn non_run_results_stay_generic() {
        let result = ToolResult::from_tool("create_notebook", "{\"ok\": true}");
        assert_eq!(result, ToolResult::Generic("{\"ok\": true}".to_string()));

        let text = ToolResult::from_tool("run_cells", "\u{1b}[31mKernel died\u{1b}[0m").sanitized();
        assert_eq!(text.into_content(), "Kernel died");
    }

    #[test]
    fn report_summaries() {
        let result = ToolResult::from_tool("run_cells", &report().to_string());
        assert_eq!(result.cell_counts(), Some((2, 2)));
        assert_eq!(
            result.sanitized().first_error().as_deref(),
            Some("ValueError: bad")
        );
    }

    #[test]
    fn compaction_keeps_latest_run_result() {
        let mut messages = vec![
            Message::user("go"),
            Message::assistant_with_call(
                "",
                crate::shared::models::ToolInvocation::new("run_cells", json!({"cells": []})),
            ),
            Message::tool_result("{\"big\": 1}", "call_a", "run_cells", ToolStatus::Success),
            Message::tool_result("{\"nb\": 1}", "call_b", "create_notebook", ToolStatus::Success),
            Message::tool_result("{\"big\": 2}", "call_c", "run_cells", ToolStatus::Error),
            Message::tool_result("{\"big\": 3}", "call_d", "run_cells", ToolStatus::Success),
        ];
        let ids: Vec<String> = messages.iter().map(|m| m.id().to_string()).collect();

        assert_eq!(compact_history(&mut messages), 2);
        assert_eq!(messages[2].content(), "success");
        assert_eq!(messages[3].content(), "{\"nb\": 1}");
        assert_eq!(messages[4].content(), "error");
        assert_eq!(messages[5].content(), "{\"big\": 3}");
        assert_eq!(
            messages.iter().map(|m| m.id().to_string()).collect::<Vec<_>>(),
            ids
        );

        assert_eq!(compact_history(&mut messages), 0);
    }
}
