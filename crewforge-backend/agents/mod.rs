pub mod fallback;
pub mod llm;
pub mod prompt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agents::llm::{LlmClient, LlmError, LlmRequest};
use crate::agents::prompt::{render_prompt, request_vars};
use crate::jobs::GenerationRequest;

/// One of the four fixed pipeline roles. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    RequirementsAnalyst,
    ArchitectureDesigner,
    Implementer,
    QualityReviewer,
}

impl Role {
    pub const PIPELINE: [Role; 4] = [
        Role::RequirementsAnalyst,
        Role::ArchitectureDesigner,
        Role::Implementer,
        Role::QualityReviewer,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Role::RequirementsAnalyst => "requirements-analyst",
            Role::ArchitectureDesigner => "architecture-designer",
            Role::Implementer => "implementer",
            Role::QualityReviewer => "quality-reviewer",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Role::RequirementsAnalyst => "Requirements Analyst",
            Role::ArchitectureDesigner => "Architecture Designer",
            Role::Implementer => "Implementer",
            Role::QualityReviewer => "Quality Reviewer",
        }
    }

    pub fn persona(self) -> Persona {
        match self {
            Role::RequirementsAnalyst => Persona {
                goal: "Turn a loose project idea into a precise, testable specification",
                expertise: "You are a senior business analyst who has scoped hundreds of software \
                            projects. You ask what the user actually needs, separate functional \
                            from non-functional requirements and write acceptance criteria that \
                            developers can verify.",
            },
            Role::ArchitectureDesigner => Persona {
                goal: "Design a clean, maintainable architecture for the specified project",
                expertise: "You are a software architect fluent in modern frameworks. You pick \
                            boring, proven patterns, define module boundaries and data flow, and \
                            document the trade-offs behind every structural decision.",
            },
            Role::Implementer => Persona {
                goal: "Write working, idiomatic source code that realises the architecture",
                expertise: "You are a pragmatic senior developer. You write small, readable \
                            functions, handle errors explicitly and follow the conventions of the \
                            chosen language and framework.",
            },
            Role::QualityReviewer => Persona {
                goal: "Review the implementation and produce a test suite and test plan",
                expertise: "You are a QA engineer who thinks in edge cases. You review code for \
                            defects, then write automated tests and a concise plan covering unit, \
                            integration and acceptance checks.",
            },
        }
    }

    /// Task template sent to the model for this role.
    pub fn task_template(self) -> &'static str {
        match self {
            Role::RequirementsAnalyst => {
                "Analyze the following project request and write a complete project \
                 specification in Markdown.\n\n\
                 Project requirements: {{requirements}}\n\
                 Framework: {{framework}}\n\
                 Language: {{language}}\n\n\
                 Include an overview, functional requirements, non-functional requirements, \
                 user stories and acceptance criteria."
            }
            Role::ArchitectureDesigner => {
                "Design the software architecture for a {{framework}} project written in \
                 {{language}}, based on the specification produced so far.\n\n\
                 Describe the components, their responsibilities, the data model, the data flow \
                 and the directory layout. Use Markdown."
            }
            Role::Implementer => {
                "Implement the main entry point of the {{framework}} project in {{language}}, \
                 following the specification and architecture above.\n\n\
                 Return the source in a single fenced code block, followed by a short explanation."
            }
            Role::QualityReviewer => {
                "Review the {{language}} implementation above for defects and missing cases. \
                 Then write an automated test suite for it.\n\n\
                 Return the tests in a single fenced code block, followed by a test plan in \
                 Markdown that covers unit, integration and acceptance testing."
            }
        }
    }

    /// Short human-readable task line shown to clients when the stage starts.
    pub fn task_description(self, request: &GenerationRequest) -> String {
        let template = match self {
            Role::RequirementsAnalyst => {
                "Analyzing requirements for a {{framework}} project in {{language}}"
            }
            Role::ArchitectureDesigner => "Designing the {{framework}} architecture",
            Role::Implementer => "Writing the {{language}} implementation",
            Role::QualityReviewer => "Reviewing the code and writing {{language}} tests",
        };
        render_prompt(template, &request_vars(request))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Fixed system-level description of a role.
#[derive(Debug, Clone, Copy)]
pub struct Persona {
    pub goal: &'static str,
    pub expertise: &'static str,
}

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("upstream model error: {0}")]
    UpstreamModel(#[from] LlmError),
}

/// Produces the text output for one role. Holds no per-invocation state.
///
/// Without a model client the agent answers from canned role templates
/// (see [`fallback`]), so the pipeline still completes offline.
#[derive(Clone)]
pub struct Agent {
    role: Role,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Agent {
    pub fn new(role: Role, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { role, llm }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_live(&self) -> bool {
        self.llm.is_some()
    }

    pub fn system_prompt(&self) -> String {
        let persona = self.role.persona();
        format!(
            "You are the {title} of a software delivery crew.\n\nGoal: {goal}.\n\n{expertise}",
            title = self.role.title(),
            goal = persona.goal,
            expertise = persona.expertise,
        )
    }

    pub fn user_prompt(&self, request: &GenerationRequest, context: &str) -> String {
        let task = render_prompt(self.role.task_template(), &request_vars(request));
        if context.trim().is_empty() {
            task
        } else {
            format!("{task}\n\nContext from previous stages:{context}")
        }
    }

    pub async fn execute(
        &self,
        request: &GenerationRequest,
        context: &str,
    ) -> Result<String, AgentError> {
        let Some(llm) = &self.llm else {
            tracing::debug!(role = %self.role, "no model configured, using canned response");
            return Ok(fallback::canned_response(self.role, request));
        };

        let llm_request = LlmRequest {
            system: self.system_prompt(),
            user: self.user_prompt(request, context),
            temperature: 0.7,
            max_tokens: 4096,
        };
        let output = llm.complete(llm_request).await?;
        Ok(output)
    }
}
