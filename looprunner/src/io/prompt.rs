//! Prompt files handed to the agent.
//!
//! Every iteration gets a freshly rendered file under `<metadata>/.prompts/`.
//! Phase prompts come from `<prompts_dir>/<phase>.md` when present, otherwise
//! from the built-in templates. Audit prompts are rendered from
//! `<prompts_dir>/audits/<name>.md` with their frontmatter and referenced
//! files folded in.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, Value, context};
use tracing::debug;

use crate::core::mode::ModeDecision;
use crate::core::types::Phase;
use crate::io::feature_store::{FEATURES_DIR, TODO_FILE};

pub const GENERATED_DIR: &str = ".prompts";
pub const AUDITS_DIR: &str = "audits";

const BUILTIN_TEMPLATES: [(Phase, &str); 6] = [
    (Phase::Onboarding, include_str!("prompts/onboarding.md")),
    (Phase::Initializer, include_str!("prompts/initializer.md")),
    (Phase::Coding, include_str!("prompts/coding.md")),
    (Phase::Todo, include_str!("prompts/todo.md")),
    (Phase::Validate, include_str!("prompts/validate.md")),
    (Phase::InProgress, include_str!("prompts/in_progress.md")),
];

/// A rendered prompt on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPrompt {
    pub phase: Phase,
    pub path: PathBuf,
}

pub struct PromptBuilder {
    metadata_dir: PathBuf,
    prompts_dir: PathBuf,
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new(metadata_dir: impl Into<PathBuf>, prompts_dir: impl Into<PathBuf>) -> Self {
        let mut env = Environment::new();
        for (phase, source) in BUILTIN_TEMPLATES {
            env.add_template(phase.as_str(), source)
                .expect("builtin prompt template should be valid");
        }
        Self {
            metadata_dir: metadata_dir.into(),
            prompts_dir: prompts_dir.into(),
            env,
        }
    }

    /// Render the prompt for `decision`, optionally prefixed by `preamble`.
    pub fn prepare(&self, decision: &ModeDecision, preamble: Option<&str>) -> Result<PreparedPrompt> {
        let phase = decision.phase();
        let body = match decision {
            ModeDecision::Directive(text) => format!("# Directive\n\n{}\n", text.trim()),
            ModeDecision::Audit(name) => self.render_audit(name)?,
            ModeDecision::Standard(phase) => self.render_phase(*phase)?,
        };
        let mut text = String::new();
        if let Some(preamble) = preamble {
            text.push_str(preamble);
        }
        text.push_str(&body);

        let dir = self.metadata_dir.join(GENERATED_DIR);
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let path = dir.join(format!("{}.md", phase.as_str()));
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        debug!(%phase, path = %path.display(), "prompt prepared");
        Ok(PreparedPrompt { phase, path })
    }

    fn base_context(&self) -> Value {
        context! {
            metadata_dir => self.metadata_dir.display().to_string(),
            features_dir => self.metadata_dir.join(FEATURES_DIR).display().to_string(),
            todo_file => self.metadata_dir.join(TODO_FILE).display().to_string(),
        }
    }

    fn render_phase(&self, phase: Phase) -> Result<String> {
        let custom = self.prompts_dir.join(format!("{}.md", phase.as_str()));
        if custom.is_file() {
            let source = fs::read_to_string(&custom)
                .with_context(|| format!("read {}", custom.display()))?;
            return self
                .env
                .render_str(&source, self.base_context())
                .with_context(|| format!("render {}", custom.display()));
        }
        let template = self
            .env
            .get_template(phase.as_str())
            .map_err(|_| anyhow!("no prompt for phase {phase}"))?;
        Ok(template.render(self.base_context())?)
    }

    fn render_audit(&self, name: &str) -> Result<String> {
        if !is_plain_file_name(name) {
            return Err(anyhow!("audit name must be a plain file stem (got '{name}')"));
        }
        let audits_dir = self.prompts_dir.join(AUDITS_DIR);
        let path = audits_dir.join(format!("{name}.md"));
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read audit template {}", path.display()))?;
        let audit = AuditTemplate::parse(name, &contents)?;

        let rendered = self
            .env
            .render_str(
                audit.body,
                context! {
                    audit_name => name,
                    category => &audit.category,
                    priority => audit.priority,
                    id_prefix => format!("audit-{}-", audit.category),
                    ..self.base_context()
                },
            )
            .with_context(|| format!("render {}", path.display()))?;

        let mut out = rendered.trim_end().to_string();
        out.push('\n');
        for include in &audit.includes {
            if !is_plain_file_name(include) {
                return Err(anyhow!(
                    "audit '{name}': include must be a file in the audits directory (got '{include}')"
                ));
            }
            let include_path = audits_dir.join(include);
            let text = fs::read_to_string(&include_path)
                .with_context(|| format!("read audit reference {}", include_path.display()))?;
            out.push_str(&format!("\n## Reference: {include}\n\n{}\n", text.trim_end()));
        }
        Ok(out)
    }
}

/// A bare file name: no separators, no parent references.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

/// Audit template split into frontmatter values and body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AuditTemplate<'a> {
    category: String,
    priority: u8,
    includes: Vec<String>,
    body: &'a str,
}

impl<'a> AuditTemplate<'a> {
    fn parse(name: &str, contents: &'a str) -> Result<Self> {
        let mut audit = AuditTemplate {
            category: name.to_string(),
            priority: 2,
            includes: Vec::new(),
            body: contents,
        };
        let Some((frontmatter, body)) = split_frontmatter(contents) else {
            return Ok(audit);
        };
        audit.body = body;
        for line in frontmatter.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once(':') else {
                continue;
            };
            let value = unquote(value.trim());
            match key.trim() {
                "category" if !value.is_empty() => audit.category = value.to_string(),
                "priority" => {
                    audit.priority = value
                        .parse()
                        .ok()
                        .filter(|p| (1..=4).contains(p))
                        .ok_or_else(|| anyhow!("audit '{name}': priority must be 1-4 (got '{value}')"))?;
                }
                "include" => {
                    audit.includes = value
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .split(',')
                        .map(|item| unquote(item.trim()).to_string())
                        .filter(|item| !item.is_empty())
                        .collect();
                }
                _ => {}
            }
        }
        Ok(audit)
    }
}

/// Split a document into (frontmatter, rest). `None` without frontmatter.
fn split_frontmatter(contents: &str) -> Option<(&str, &str)> {
    let after = contents.strip_prefix("---\n")?;
    let end = after.find("\n---\n")?;
    Some((&after[..end], &after[end + 5..]))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}
