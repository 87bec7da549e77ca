//! Canned role responses used when no model credential is configured.
//!
//! The output is a pure function of the role and the request, so offline runs
//! are reproducible and still produce every artifact.

use crate::agents::Role;
use crate::agents::prompt::{render_prompt, request_vars};
use crate::artifacts::line_comment;
use crate::jobs::GenerationRequest;

const REQUIREMENTS_TEMPLATE: &str = "\
# Project Specification

## Overview
{{requirements}}

The project is built with {{framework}} and written in {{language}}.

## Functional Requirements
1. The application implements the behaviour described in the overview.
2. User input is validated before it is processed.
3. Errors are reported to the user with an actionable message.

## Non-Functional Requirements
- Responsive under normal load.
- Code follows the {{language}} community style guide.
- Core logic is covered by automated tests.

## Acceptance Criteria
- The application starts without errors.
- Every functional requirement above has at least one passing test.
";

const ARCHITECTURE_TEMPLATE: &str = "\
# Architecture

## Components
- **Entry point**: boots the {{framework}} application and wires dependencies.
- **Domain layer**: pure {{language}} logic for the features in the specification.
- **Interface layer**: {{framework}} handlers that translate user actions into domain calls.

## Data Flow
User action -> interface layer -> domain layer -> state update -> rendered result.

## Directory Layout
```
main.{{ext}}
tests.{{ext}}
README.md
```
";

const IMPLEMENTATION_TEMPLATE: &str = "\
```{{fence}}
{{comment}} Entry point for the {{framework}} project.
{{comment}} Requirements: {{summary}}
{{comment}} Generated without a language model; replace with a real implementation.
```

The file above is a starting skeleton for the {{framework}} application.
";

const REVIEW_TEMPLATE: &str = "\
```{{fence}}
{{comment}} Test suite for main.{{ext}}.
{{comment}} Generated without a language model; add cases for each acceptance criterion.
```

# Test Plan

## Unit Tests
- Exercise each domain function with valid and invalid input.

## Integration Tests
- Start the {{framework}} application and drive it through its public interface.

## Acceptance Tests
- Verify every acceptance criterion from the project specification.
";

pub fn canned_response(role: Role, request: &GenerationRequest) -> String {
    let mut vars = request_vars(request);
    let language = request.language.trim();
    vars.insert("ext", crate::artifacts::extension_for(language).to_string());
    vars.insert("fence", language.to_lowercase());
    vars.insert("comment", line_comment(language).to_string());
    let summary = request.requirements.trim().lines().next().unwrap_or_default();
    vars.insert("summary", summary.to_string());

    let template = match role {
        Role::RequirementsAnalyst => REQUIREMENTS_TEMPLATE,
        Role::ArchitectureDesigner => ARCHITECTURE_TEMPLATE,
        Role::Implementer => IMPLEMENTATION_TEMPLATE,
        Role::QualityReviewer => REVIEW_TEMPLATE,
    };
    render_prompt(template, &vars)
}
