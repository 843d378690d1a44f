use crate::{schema::ResponseSchema, transport::OracleRequest};

/// Everything the oracle needs to perform one task, independent of the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    /// Task identifier, e.g. `extract.clauses` or `match.GDPR`.
    pub task: String,
    /// Role and task instructions.
    pub instructions: String,
    /// Document or entity excerpt the task operates on.
    pub excerpt: String,
    /// Repair notes appended after rejected attempts.
    pub repair_notes: Vec<String>,
}

impl PromptContext {
    /// Creates a context without repair notes.
    #[must_use]
    pub fn new(
        task: impl Into<String>,
        instructions: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            instructions: instructions.into(),
            excerpt: excerpt.into(),
            repair_notes: Vec::new(),
        }
    }

    /// Appends a repair instruction describing why the last answer was rejected.
    pub fn push_repair(&mut self, problems: &[String]) {
        let listed = problems
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.repair_notes.push(format!(
            "Your previous answer was rejected:\n{listed}\nRespond again with JSON only, matching the schema exactly."
        ));
    }

    /// Builds the transport request for `schema`.
    #[must_use]
    pub fn to_request(&self, schema: &ResponseSchema) -> OracleRequest {
        let mut context_text = format!("{}\n\n{}", self.instructions.trim(), self.excerpt.trim());
        for note in &self.repair_notes {
            context_text.push_str("\n\n");
            context_text.push_str(note);
        }
        OracleRequest {
            task_kind: self.task.clone(),
            schema: schema.render(),
            context_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Answer {
        a: String,
    }

    #[test]
    fn repair_notes_accumulate_in_request() {
        let schema = ResponseSchema::of::<Answer>("t");
        let mut ctx = PromptContext::new("extract.clauses", "Extract clauses.", "Section 1 ...");
        ctx.push_repair(&["$: \"a\" is a required property".into()]);
        let request = ctx.to_request(&schema);
        assert_eq!(request.task_kind, "extract.clauses");
        assert!(request.context_text.starts_with("Extract clauses.\n\nSection 1"));
        assert!(request.context_text.contains("- $: \"a\" is a required property"));
        assert!(request.schema.contains("\"required\""));
        assert!(request.schema.contains("\"a\""));
    }
}
