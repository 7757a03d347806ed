//! System prompt assembly.
//!
//! Builds the run's system message from the run configuration, appending
//! project instructions (`MARSHAL.md` at the sandbox root) when present.

use std::path::Path;

use tracing::{debug, info};

use crate::config::{ExecutionMode, RunConfig};

/// Project instruction file discovered at the sandbox root.
pub const PROJECT_INSTRUCTIONS_FILE: &str = "MARSHAL.md";

/// Assemble the system prompt for one run.
pub fn build_system_prompt(config: &RunConfig, root: &Path) -> String {
    let mut sections = vec![base_instructions(config)];

    let instructions = root.join(PROJECT_INSTRUCTIONS_FILE);
    if instructions.is_file() {
        if let Ok(content) = std::fs::read_to_string(&instructions) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                info!(path = %instructions.display(), "loaded project instructions");
                sections.push(format!("# Project Instructions\n\n{trimmed}"));
            }
        }
    } else {
        debug!(dir = %root.display(), "no project instructions file");
    }

    sections.join("\n\n---\n\n")
}

fn base_instructions(config: &RunConfig) -> String {
    let tooling_note = match config.mode {
        ExecutionMode::LocalOnly => {
            "Only local tools (file access, shell) are available in this run."
        }
        ExecutionMode::Hybrid => {
            "Local tools are available, plus any connected remote tools."
        }
        ExecutionMode::RemoteAugmented => {
            "Local tools are available, and remote tools are connected and expected to be used where they fit."
        }
    };

    format!(
        "You are an autonomous assistant operating inside a sandboxed working directory. \
You accomplish the user's request by calling the provided tools; respond with plain text \
only once the request is complete. Some actions require operator approval; if an action \
is refused, adapt your plan instead of retrying it verbatim.\n\n{tooling_note}"
    )
}
