use crate::error::{ReportError, Result};

use super::PromptLibrary;

/// Assembles a prompt from the usual role / context / task sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptBuilder {
    role: Option<String>,
    context: Option<String>,
    task: Option<String>,
    constraints: Vec<String>,
    examples: Vec<(String, String)>,
    output_format: Option<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.examples.push((input.into(), output.into()));
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    pub fn build(&self) -> String {
        let mut sections = Vec::new();
        if let Some(role) = &self.role {
            sections.push(format!("## Role\n\n{role}"));
        }
        if let Some(context) = &self.context {
            sections.push(format!("## Context\n\n{context}"));
        }
        if let Some(task) = &self.task {
            sections.push(format!("## Task\n\n{task}"));
        }
        if !self.constraints.is_empty() {
            let bullets: Vec<String> = self.constraints.iter().map(|c| format!("- {c}")).collect();
            sections.push(format!("## Constraints\n\n{}", bullets.join("\n")));
        }
        if !self.examples.is_empty() {
            let examples: Vec<String> = self
                .examples
                .iter()
                .enumerate()
                .map(|(idx, (input, output))| {
                    format!(
                        "### Example {}\n\n**Input:**\n{input}\n\n**Output:**\n{output}",
                        idx + 1
                    )
                })
                .collect();
            sections.push(format!("## Examples\n\n{}", examples.join("\n\n")));
        }
        if let Some(format) = &self.output_format {
            sections.push(format!("## Output Format\n\n{format}"));
        }
        sections.join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptStep {
    pub name: String,
    pub template: String,
}

/// Chains several prompt templates into one ordered analysis.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    steps: Vec<PromptStep>,
}

impl PromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, name: impl Into<String>, template: impl Into<String>) -> &mut Self {
        self.steps.push(PromptStep {
            name: name.into(),
            template: template.into(),
        });
        self
    }

    pub fn add_library_step(
        &mut self,
        library: &PromptLibrary,
        category: &str,
        name: &str,
    ) -> Result<&mut Self> {
        let template = library.load(category, name)?;
        Ok(self.add_step(name, template.to_string()))
    }

    pub fn steps(&self) -> &[PromptStep] {
        &self.steps
    }

    pub fn compose(&self) -> Result<String> {
        match self.steps.as_slice() {
            [] => Err(ReportError::EmptyComposition),
            [only] => Ok(only.template.clone()),
            steps => {
                let body: Vec<String> = steps
                    .iter()
                    .enumerate()
                    .map(|(idx, step)| format!("## Step {}: {}\n\n{}\n\n", idx + 1, step.name, step.template))
                    .collect();
                Ok(format!(
                    "# Multi-Step Analysis\n\nComplete the following analysis steps in order:\n\n{}",
                    body.join("---\n\n")
                ))
            }
        }
    }
}
