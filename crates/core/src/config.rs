//! Layered run configuration.
//!
//! Two scopes feed one merged [`Settings`] value: a global file at
//! `<user config dir>/marshal/config.json` and a project file discovered by
//! walking upward from the working directory to the filesystem root. The two
//! permission rule lists are unioned across scopes; every other key is
//! project-overrides-global, with non-permission arrays replaced wholesale.
//!
//! Loading is strict where it matters: an unknown schema version or a glob
//! pattern that fails to compile is a fatal [`ConfigError`]; a run is never
//! started against a half-valid rule set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

/// The only schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Accepted project config filenames, checked in order at each directory
/// level during the upward walk.
pub const PROJECT_FILE_NAMES: &[&str] = &[".marshal.json", "marshal.json"];

const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_MAX_TURNS: usize = 10;

/// Load .env file (silently ignores if missing). Provider API keys are read
/// from the environment, never from config files.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Merged settings ─────────────────────────────────────────────────

/// Which scope a rule or value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigScope {
    Global,
    Project,
}

impl std::fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigScope::Global => write!(f, "global"),
            ConfigScope::Project => write!(f, "project"),
        }
    }
}

/// A permission pattern together with the scope that contributed it, so
/// denial reasons can cite the originating rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedPattern {
    pub pattern: String,
    pub scope: ConfigScope,
}

/// Allow/deny pattern lists for one action kind.
#[derive(Debug, Clone, Default)]
pub struct KindRules {
    pub allow: Vec<SourcedPattern>,
    pub deny: Vec<SourcedPattern>,
}

/// The three independent rule sets.
#[derive(Debug, Clone, Default)]
pub struct PermissionSettings {
    pub read: KindRules,
    pub write: KindRules,
    pub execute: KindRules,
}

/// Declares one remote tool server the run may connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDecl {
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Transport used to reach a remote tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
}

fn default_true() -> bool {
    true
}

/// The merged, validated configuration handed to the embedding application.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: String,
    pub model: Option<String>,
    pub max_turns: usize,
    pub auto_approve: bool,
    pub permissions: PermissionSettings,
    pub require_approval: Vec<String>,
    pub mcp_servers: Vec<McpServerDecl>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: None,
            max_turns: DEFAULT_MAX_TURNS,
            auto_approve: false,
            permissions: PermissionSettings::default(),
            require_approval: Vec::new(),
            mcp_servers: Vec::new(),
        }
    }
}

// ── Raw file shape ──────────────────────────────────────────────────

/// One config document as written on disk. Unrecognized keys are ignored
/// for forward compatibility; the schema version is not.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsDoc {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<usize>,
    pub auto_approve: Option<bool>,
    #[serde(default)]
    pub permissions: PermissionDoc,
    pub require_approval: Option<Vec<String>>,
    pub mcp_servers: Option<Vec<McpServerDecl>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionDoc {
    #[serde(default)]
    pub read: KindRulesDoc,
    #[serde(default)]
    pub write: KindRulesDoc,
    #[serde(default)]
    pub execute: KindRulesDoc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KindRulesDoc {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

// ── Discovery ───────────────────────────────────────────────────────

/// Path of the global config file, if a user config directory exists.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("marshal").join("config.json"))
}

/// Walk upward from `start` looking for an accepted project config filename.
/// The first hit wins; the walk stops at the filesystem root.
pub fn discover_project_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        for name in PROJECT_FILE_NAMES {
            let candidate = d.join(name);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "found project config");
                return Some(candidate);
            }
        }
        dir = d.parent();
    }
    None
}

// ── Loading & merging ───────────────────────────────────────────────

impl Settings {
    /// Load and merge global + project configuration for a working directory.
    ///
    /// Either scope may be absent; both absent yields the defaults (which
    /// carry empty allow lists, i.e. everything is denied until configured).
    pub fn load(working_dir: &Path) -> Result<Self, ConfigError> {
        let global = match global_config_path() {
            Some(p) if p.is_file() => Some(load_doc(&p)?),
            _ => None,
        };
        let project = match discover_project_file(working_dir) {
            Some(p) => Some(load_doc(&p)?),
            None => None,
        };
        let settings = Self::from_docs(global, project)?;
        info!(
            provider = %settings.provider,
            max_turns = settings.max_turns,
            "configuration loaded"
        );
        Ok(settings)
    }

    /// Merge raw documents into validated settings.
    pub fn from_docs(
        global: Option<SettingsDoc>,
        project: Option<SettingsDoc>,
    ) -> Result<Self, ConfigError> {
        let mut merged = Settings::default();

        if let Some(doc) = &global {
            apply_scalars(&mut merged, doc);
            union_permissions(&mut merged.permissions, &doc.permissions, ConfigScope::Global);
        }
        if let Some(doc) = &project {
            apply_scalars(&mut merged, doc);
            union_permissions(&mut merged.permissions, &doc.permissions, ConfigScope::Project);
        }

        merged.validate()?;
        Ok(merged)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::Invalid("max_turns must be at least 1".into()));
        }
        for kind in [
            &self.permissions.read,
            &self.permissions.write,
            &self.permissions.execute,
        ] {
            for sourced in kind.allow.iter().chain(kind.deny.iter()) {
                glob::Pattern::new(&sourced.pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: sourced.pattern.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

/// Project-overrides-global for scalars; arrays other than the permission
/// lists are replaced wholesale.
fn apply_scalars(merged: &mut Settings, doc: &SettingsDoc) {
    if let Some(p) = &doc.provider {
        merged.provider = p.clone();
    }
    if let Some(m) = &doc.model {
        merged.model = Some(m.clone());
    }
    if let Some(t) = doc.max_turns {
        merged.max_turns = t;
    }
    if let Some(a) = doc.auto_approve {
        merged.auto_approve = a;
    }
    if let Some(r) = &doc.require_approval {
        merged.require_approval = r.clone();
    }
    if let Some(s) = &doc.mcp_servers {
        merged.mcp_servers = s.clone();
    }
}

fn union_permissions(merged: &mut PermissionSettings, doc: &PermissionDoc, scope: ConfigScope) {
    union_kind(&mut merged.read, &doc.read, scope);
    union_kind(&mut merged.write, &doc.write, scope);
    union_kind(&mut merged.execute, &doc.execute, scope);
}

fn union_kind(merged: &mut KindRules, doc: &KindRulesDoc, scope: ConfigScope) {
    for pattern in &doc.allow {
        merged.allow.push(SourcedPattern {
            pattern: pattern.clone(),
            scope,
        });
    }
    for pattern in &doc.deny {
        merged.deny.push(SourcedPattern {
            pattern: pattern.clone(),
            scope,
        });
    }
}

fn load_doc(path: &Path) -> Result<SettingsDoc, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let doc: SettingsDoc = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    if doc.schema_version != SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedSchemaVersion(doc.schema_version));
    }
    debug!(path = %path.display(), "parsed config document");
    Ok(doc)
}
