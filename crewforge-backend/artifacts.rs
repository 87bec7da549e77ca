//! Turns the four stage outputs of a completed job into named files.
//!
//! The file-name mapping is the contract. Pulling code out of free-form model
//! text is a best-effort heuristic: the first fenced block wins, otherwise the
//! whole output is used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::agents::Role;
use crate::jobs::GenerationRequest;

/// File name → content. Ordered so serialized output is stable.
pub type ArtifactMap = BTreeMap<String, String>;

pub const DEFAULT_EXTENSION: &str = "txt";

const LANGUAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("javascript", "js"),
    ("typescript", "ts"),
    ("python", "py"),
    ("java", "java"),
    ("go", "go"),
    ("golang", "go"),
    ("rust", "rs"),
    ("c", "c"),
    ("c++", "cpp"),
    ("cpp", "cpp"),
    ("c#", "cs"),
    ("csharp", "cs"),
    ("ruby", "rb"),
    ("php", "php"),
    ("swift", "swift"),
    ("kotlin", "kt"),
    ("scala", "scala"),
    ("dart", "dart"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleOutput {
    pub role: Role,
    pub output: String,
}

pub fn language_extensions() -> &'static [(&'static str, &'static str)] {
    LANGUAGE_EXTENSIONS
}

/// Extension for `language`, case-insensitive; `txt` when unknown.
pub fn extension_for(language: &str) -> &'static str {
    let language = language.trim().to_lowercase();
    LANGUAGE_EXTENSIONS
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

pub fn line_comment(language: &str) -> &'static str {
    match extension_for(language) {
        "php" | "js" | "ts" | "java" | "go" | "rs" | "c" | "cpp" | "cs" | "swift" | "kt"
        | "scala" | "dart" => "//",
        _ => "#",
    }
}

/// Name of the main file produced for a role key. Unknown roles map to `<role>.md`.
pub fn primary_file_name(role_key: &str, ext: &str) -> String {
    match role_key {
        "requirements-analyst" => "PROJECT_SPECIFICATION.md".to_string(),
        "architecture-designer" => "ARCHITECTURE.md".to_string(),
        "implementer" => format!("main.{ext}"),
        "quality-reviewer" => format!("tests.{ext}"),
        other => format!("{other}.md"),
    }
}

/// Build the artifact set for a completed job. Pure: identical inputs yield
/// identical maps.
pub fn assemble(request: &GenerationRequest, outputs: &[RoleOutput]) -> ArtifactMap {
    let ext = extension_for(&request.language);
    let mut artifacts = ArtifactMap::new();

    for RoleOutput { role, output } in outputs {
        let name = primary_file_name(role.key(), ext);
        match role {
            Role::RequirementsAnalyst | Role::ArchitectureDesigner => {
                artifacts.insert(name, output.clone());
            }
            Role::Implementer => {
                artifacts.insert(name.clone(), extract_code_block(output).to_string());
                artifacts.insert("README.md".to_string(), readme(request, ext));
                artifacts.insert("package.json".to_string(), package_json(request, &name));
            }
            Role::QualityReviewer => {
                artifacts.insert(name, extract_code_block(output).to_string());
                artifacts.insert("TEST_PLAN.md".to_string(), test_plan(request, output));
            }
        }
    }

    artifacts
}

/// Body of the first fenced code block in `text`, or the trimmed text when
/// there is none.
pub fn extract_code_block(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text.trim();
    };
    let after_fence = &text[open + 3..];
    // Skip the info string (e.g. "python") up to the end of the fence line.
    let Some(body_start) = after_fence.find('\n') else {
        return text.trim();
    };
    let body = &after_fence[body_start + 1..];
    match body.find("```") {
        Some(close) => body[..close].trim_end(),
        None => body.trim_end(),
    }
}

fn readme(request: &GenerationRequest, ext: &str) -> String {
    format!(
        "# {title}\n\n\
         {requirements}\n\n\
         ## Stack\n\n\
         - Framework: {framework}\n\
         - Language: {language}\n\n\
         ## Files\n\n\
         - `PROJECT_SPECIFICATION.md`: requirements and acceptance criteria\n\
         - `ARCHITECTURE.md`: components and data flow\n\
         - `main.{ext}`: application entry point\n\
         - `tests.{ext}`: automated tests\n\
         - `TEST_PLAN.md`: test strategy\n\n\
         ## Getting Started\n\n\
         ```sh\n{run}\n```\n",
        title = project_title(request),
        requirements = request.requirements.trim(),
        framework = request.framework.trim(),
        language = request.language.trim(),
        run = run_command(ext, &format!("main.{ext}")),
    )
}

fn package_json(request: &GenerationRequest, main_file: &str) -> String {
    let ext = extension_for(&request.language);
    let test_file = format!("tests.{ext}");
    let manifest = json!({
        "name": package_name(&request.framework),
        "version": "1.0.0",
        "description": first_line(&request.requirements, 200),
        "main": main_file,
        "scripts": {
            "start": run_command(ext, main_file),
            "test": run_command(ext, &test_file),
        },
        "keywords": [request.framework.trim(), request.language.trim()],
        "license": "MIT",
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}

fn test_plan(request: &GenerationRequest, review: &str) -> String {
    format!(
        "# Test Plan: {title}\n\n{review}\n",
        title = project_title(request),
        review = review.trim()
    )
}

fn run_command(ext: &str, file: &str) -> String {
    match ext {
        "py" => format!("python {file}"),
        "js" => format!("node {file}"),
        "ts" => format!("npx ts-node {file}"),
        "go" => format!("go run {file}"),
        "rb" => format!("ruby {file}"),
        "php" => format!("php {file}"),
        _ => format!("echo \"see README.md to run {file}\""),
    }
}

fn project_title(request: &GenerationRequest) -> String {
    format!("{} Project", request.framework.trim())
}

fn package_name(framework: &str) -> String {
    let slug: String = framework
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "generated-project".to_string()
    } else {
        format!("{slug}-project")
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    text.trim()
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(max_chars)
        .collect()
}

/// Write every artifact into `dir`, creating it if needed.
pub fn write_artifacts(artifacts: &ArtifactMap, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let mut written = Vec::with_capacity(artifacts.len());
    for (name, content) in artifacts {
        let path = dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
