//! Structured workflow generation: request schema, validation, and rendering
//!
//! The model is asked for JSON matching [`workflow_schema`]. What comes back is
//! treated as untrusted: it is parsed as a loose JSON value and every required
//! field is checked explicitly before a [`Workflow`] is built. Any shape
//! problem becomes [`ChatError::MalformedResponse`].

use serde_json::{json, Map, Value};

use crate::error::ChatError;

/// One numbered step of a workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub step: i64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub title: String,
    pub steps: Vec<WorkflowStep>,
}

/// Prompt sent to the structured-generation endpoint for a user task
pub fn workflow_prompt(task: &str) -> String {
    format!(
        "Create a detailed step-by-step workflow for the following task: {}",
        task
    )
}

/// Response schema in the Gemini `responseSchema` dialect
pub fn workflow_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "workflowTitle": {
                "type": "STRING",
                "description": "A concise title for the entire workflow."
            },
            "steps": {
                "type": "ARRAY",
                "description": "The sequence of steps in the workflow.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "step": {
                            "type": "INTEGER",
                            "description": "The step number."
                        },
                        "title": {
                            "type": "STRING",
                            "description": "A short title for this step."
                        },
                        "description": {
                            "type": "STRING",
                            "description": "A detailed description of what to do in this step."
                        }
                    },
                    "required": ["step", "title", "description"]
                }
            }
        },
        "required": ["workflowTitle", "steps"]
    })
}

impl Workflow {
    /// Parse and validate a structured response. Steps come back sorted.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| ChatError::MalformedResponse(format!("not valid JSON ({})", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| malformed("expected a JSON object"))?;

        let title = match object.get("workflowTitle") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) => return Err(malformed("`workflowTitle` is empty")),
            Some(_) => return Err(malformed("`workflowTitle` is not a string")),
            None => return Err(malformed("missing `workflowTitle`")),
        };

        let raw_steps = match object.get("steps") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(malformed("`steps` is not an array")),
            None => return Err(malformed("missing `steps`")),
        };

        let mut steps = raw_steps
            .iter()
            .enumerate()
            .map(|(i, item)| parse_step(i, item))
            .collect::<Result<Vec<_>, _>>()?;

        // Tie order between equal step numbers is unspecified.
        steps.sort_by_key(|s| s.step);

        Ok(Self { title, steps })
    }

    /// Render as display text: bold title, then one bold heading and a
    /// description paragraph per step.
    pub fn render(&self) -> String {
        let mut out = format!("**{}**\n\n", self.title);
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step);

        for item in steps {
            out.push_str(&format!("**{}. {}**\n", item.step, item.title));
            out.push_str(&item.description);
            out.push_str("\n\n");
        }

        out.trim_end().to_string()
    }
}

fn parse_step(index: usize, item: &Value) -> Result<WorkflowStep, ChatError> {
    let fields = item
        .as_object()
        .ok_or_else(|| malformed(&format!("step {} is not an object", index)))?;

    Ok(WorkflowStep {
        step: step_number(index, fields)?,
        title: string_field(index, fields, "title")?,
        description: string_field(index, fields, "description")?,
    })
}

// Models occasionally quote numbers or emit `2.0`; both are accepted.
fn step_number(index: usize, fields: &Map<String, Value>) -> Result<i64, ChatError> {
    let number = match fields.get("step") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| integral_in_range(*f)).map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
        None => return Err(malformed(&format!("step {} is missing `step`", index))),
    };
    number.ok_or_else(|| malformed(&format!("step {} has a non-integer `step`", index)))
}

fn integral_in_range(f: f64) -> bool {
    f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

fn string_field(index: usize, fields: &Map<String, Value>, name: &str) -> Result<String, ChatError> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(malformed(&format!("step {} `{}` is not a string", index, name))),
        None => Err(malformed(&format!("step {} is missing `{}`", index, name))),
    }
}

fn malformed(reason: &str) -> ChatError {
    ChatError::MalformedResponse(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SORTED: &str = r#"{
        "workflowTitle": "T",
        "steps": [
            {"step": 1, "title": "A", "description": "do a"},
            {"step": 2, "title": "B", "description": "do b"}
        ]
    }"#;

    #[test]
    fn test_render_format() {
        let text = Workflow::parse(SORTED).unwrap().render();
        assert_eq!(text, "**T**\n\n**1. A**\ndo a\n\n**2. B**\ndo b");
    }

    #[test]
    fn test_render_is_idempotent() {
        let workflow = Workflow::parse(SORTED).unwrap();
        assert_eq!(workflow.render(), workflow.render());
        assert_eq!(Workflow::parse(SORTED).unwrap().render(), workflow.render());
    }

    #[test]
    fn test_out_of_order_steps_are_sorted() {
        let text = r#"{"workflowTitle":"T","steps":[
            {"step":2,"title":"Second","description":"b"},
            {"step":1,"title":"First","description":"a"}
        ]}"#;
        let rendered = Workflow::parse(text).unwrap().render();
        let first = rendered.find("**1. First**").unwrap();
        let second = rendered.find("**2. Second**").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_render_sorts_hand_built_workflow() {
        let workflow = Workflow {
            title: "T".to_string(),
            steps: vec![
                WorkflowStep { step: 3, title: "C".into(), description: "c".into() },
                WorkflowStep { step: 1, title: "A".into(), description: "a".into() },
            ],
        };
        assert_eq!(workflow.render(), "**T**\n\n**1. A**\na\n\n**3. C**\nc");
    }

    #[test]
    fn test_empty_steps_renders_title_only() {
        let rendered = Workflow::parse(r#"{"workflowTitle":"Only","steps":[]}"#)
            .unwrap()
            .render();
        assert_eq!(rendered, "**Only**");
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        let text = r#"{"workflowTitle":"T","steps":[{"step":1,"title":"A","description":"ends with space   \n"}]}"#;
        let rendered = Workflow::parse(text).unwrap().render();
        assert!(rendered.ends_with("ends with space"));
    }

    #[test]
    fn test_missing_steps_is_malformed() {
        let err = Workflow::parse(r#"{"workflowTitle":"T"}"#).unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
    }

    #[test]
    fn test_missing_or_empty_title_is_malformed() {
        assert!(matches!(
            Workflow::parse(r#"{"steps":[]}"#),
            Err(ChatError::MalformedResponse(_))
        ));
        assert!(matches!(
            Workflow::parse(r#"{"workflowTitle":"","steps":[]}"#),
            Err(ChatError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(
            Workflow::parse("here is your workflow!"),
            Err(ChatError::MalformedResponse(_))
        ));
        assert!(matches!(
            Workflow::parse("[1, 2]"),
            Err(ChatError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_step_missing_field_is_malformed() {
        let text = r#"{"workflowTitle":"T","steps":[{"step":1,"title":"A"}]}"#;
        let err = Workflow::parse(text).unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_loose_step_numbers_accepted() {
        let text = r#"{"workflowTitle":"T","steps":[
            {"step":"2","title":"B","description":"b"},
            {"step":1.0,"title":"A","description":"a"}
        ]}"#;
        let workflow = Workflow::parse(text).unwrap();
        assert_eq!(workflow.steps[0].step, 1);
        assert_eq!(workflow.steps[1].step, 2);

        let bad = r#"{"workflowTitle":"T","steps":[{"step":1.5,"title":"A","description":"a"}]}"#;
        assert!(Workflow::parse(bad).is_err());
    }

    #[test]
    fn test_huge_step_number_is_malformed() {
        for step in ["1e300", "-1e300", "9223372036854775808.0"] {
            let text = format!(
                r#"{{"workflowTitle":"T","steps":[{{"step":{},"title":"A","description":"a"}}]}}"#,
                step
            );
            assert!(matches!(
                Workflow::parse(&text),
                Err(ChatError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn test_schema_requires_fields() {
        let schema = workflow_schema();
        assert_eq!(schema["required"], json!(["workflowTitle", "steps"]));
        assert_eq!(
            schema["properties"]["steps"]["items"]["required"],
            json!(["step", "title", "description"])
        );
    }

    #[test]
    fn test_prompt_wraps_task() {
        assert_eq!(
            workflow_prompt("bake bread"),
            "Create a detailed step-by-step workflow for the following task: bake bread"
        );
    }
}
