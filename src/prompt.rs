//! Capability Manifest & System Prompt Builder: assembles the system prompt
//! from a fixed role description plus a set of optional blocks describing the
//! agent's current mode, autonomy posture, tool roster, and any known
//! incompatibilities with the configured model.
//!
//! The manifest block is idempotent: calling [`SystemPromptBuilder::build`]
//! again on the same inputs replaces the previous marker-delimited block
//! rather than appending a second copy, so repeated injection across turns
//! never grows the prompt unboundedly.

use crate::tools::Tool;
use std::sync::Arc;

const MANIFEST_BEGIN: &str = "<!-- opta:capability-manifest:begin -->";
const MANIFEST_END: &str = "<!-- opta:capability-manifest:end -->";

/// Operating mode, altering which tool rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Plan,
    Review,
    Research,
    Execution,
}

impl AgentMode {
    fn label(self) -> &'static str {
        match self {
            AgentMode::Plan => "plan",
            AgentMode::Review => "review",
            AgentMode::Research => "research",
            AgentMode::Execution => "execution",
        }
    }

    fn block(self) -> Option<&'static str> {
        match self {
            AgentMode::Plan => Some(
                "You are in plan mode: describe the approach and the files you intend to \
                 touch before making any changes. Do not call file-modifying tools.",
            ),
            AgentMode::Review => Some(
                "You are in review mode: inspect the proposed change and report issues. \
                 Do not call file-modifying tools.",
            ),
            AgentMode::Research => Some(
                "You are in research mode: prioritize reading and search tools. File writes \
                 should be limited to notes unless explicitly asked to implement.",
            ),
            AgentMode::Execution => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityManifest {
    pub mode: Option<AgentMode>,
    pub autonomy_level: u8,
    pub ceo_mode: bool,
    pub profile: Option<String>,
    pub tool_count: usize,
    pub research_enabled: bool,
    pub browser_enabled: bool,
    pub learning_enabled: bool,
    pub policy_enabled: bool,
}

/// Builds a system prompt from a fixed role description and a set of
/// optional blocks; see §4.5. Each `with_*` call is independent of order.
#[derive(Default)]
pub struct SystemPromptBuilder {
    role_description: String,
    working_directory: Option<String>,
    project_context: Option<String>,
    tool_compatibility_warning: Option<String>,
    learning_retrieval: Option<String>,
    export_map: Option<Vec<(String, String)>>,
    manifest: CapabilityManifest,
}

impl SystemPromptBuilder {
    pub fn new(role_description: impl Into<String>) -> Self {
        Self {
            role_description: role_description.into(),
            ..Default::default()
        }
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn project_context(mut self, context: impl Into<String>) -> Self {
        self.project_context = Some(context.into());
        self
    }

    pub fn tool_compatibility_warning(mut self, warning: impl Into<String>) -> Self {
        self.tool_compatibility_warning = Some(warning.into());
        self
    }

    pub fn learning_retrieval(mut self, block: impl Into<String>) -> Self {
        self.learning_retrieval = Some(block.into());
        self
    }

    /// Names and one-line descriptions of symbols (functions, files, project
    /// exports) the model may reference by name without rediscovering them.
    pub fn export_map(mut self, entries: Vec<(String, String)>) -> Self {
        self.export_map = Some(entries);
        self
    }

    pub fn manifest(mut self, manifest: CapabilityManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Assembles the full system prompt. `existing` is a prior system prompt
    /// (if any) that may already contain a manifest block from an earlier
    /// turn; when present, that block is replaced in place rather than the
    /// whole prompt being rebuilt, so any hand-authored text around it (e.g.
    /// from a caller who edited the system prompt between turns) survives.
    pub fn build(&self, existing: Option<&str>) -> String {
        let manifest_block = self.render_manifest_block();

        match existing {
            Some(prior) if prior.contains(MANIFEST_BEGIN) && prior.contains(MANIFEST_END) => {
                replace_marker_block(prior, &manifest_block)
            }
            Some(prior) => format!("{prior}\n\n{manifest_block}"),
            None => {
                let mut sections = vec![self.role_description.clone()];
                if let Some(dir) = &self.working_directory {
                    sections.push(format!("Working directory: {dir}"));
                }
                if let Some(mode) = self.manifest.mode {
                    if let Some(block) = mode.block() {
                        sections.push(block.to_string());
                    }
                }
                if self.manifest.autonomy_level > 1 || self.manifest.ceo_mode {
                    sections.push(autonomy_block(&self.manifest));
                }
                if let Some(context) = &self.project_context {
                    sections.push(context.clone());
                }
                if let Some(entries) = &self.export_map {
                    sections.push(render_export_map(entries));
                }
                if let Some(warning) = &self.tool_compatibility_warning {
                    sections.push(format!("Note: {warning}"));
                }
                if let Some(retrieval) = &self.learning_retrieval {
                    sections.push(retrieval.clone());
                }
                sections.push(manifest_block);
                sections.join("\n\n")
            }
        }
    }

    fn render_manifest_block(&self) -> String {
        let m = &self.manifest;
        let mode = m.mode.map(AgentMode::label).unwrap_or("execution");
        let profile = m.profile.as_deref().unwrap_or("default");
        format!(
            "{MANIFEST_BEGIN}\n\
             mode: {mode}\n\
             profile: {profile}\n\
             tools: {tool_count}\n\
             research: {research}\n\
             browser: {browser}\n\
             learning: {learning}\n\
             policy: {policy}\n\
             {MANIFEST_END}",
            tool_count = m.tool_count,
            research = m.research_enabled,
            browser = m.browser_enabled,
            learning = m.learning_enabled,
            policy = m.policy_enabled,
        )
    }
}

fn render_export_map(entries: &[(String, String)]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|(name, desc)| format!("- {name}: {desc}"))
        .collect();
    format!("Known exports:\n{}", lines.join("\n"))
}

fn autonomy_block(manifest: &CapabilityManifest) -> String {
    if manifest.ceo_mode {
        format!(
            "You are operating at autonomy level {} in CEO mode: prioritize delegation, use \
             live data sources over assumptions, and prepare an executive summary at session end.",
            manifest.autonomy_level
        )
    } else {
        format!(
            "You are operating at autonomy level {}: act on your own judgment within the \
             granted tool permissions rather than asking for confirmation on routine steps.",
            manifest.autonomy_level
        )
    }
}

fn replace_marker_block(prior: &str, new_block: &str) -> String {
    let Some(start) = prior.find(MANIFEST_BEGIN) else {
        return format!("{prior}\n\n{new_block}");
    };
    let Some(end_rel) = prior[start..].find(MANIFEST_END) else {
        return format!("{prior}\n\n{new_block}");
    };
    let end = start + end_rel + MANIFEST_END.len();
    format!("{}{}{}", &prior[..start], new_block, &prior[end..])
}

/// Renders a short tool roster summary, used by callers composing a
/// project-context block that references which tools are currently available.
pub fn describe_tools(tools: &[Arc<Tool>]) -> String {
    if tools.is_empty() {
        return "No tools registered.".to_string();
    }
    let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
    format!("Available tools: {}", names.join(", "))
}
