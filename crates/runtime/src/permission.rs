//! Glob-based permission evaluation for file and command actions.
//!
//! Three independent rule sets (read, write, execute), each with allow and
//! deny pattern lists, plus a set of action kinds or tool names that always
//! require human approval. Patterns are compiled once into an immutable
//! snapshot; reload swaps the whole snapshot atomically so no evaluation
//! ever observes a half-updated rule set.
//!
//! Evaluation order is fixed: deny-list match blocks immediately, an
//! allow-list match is required to proceed, and only then is the
//! approval-required set consulted. Path targets are resolved against the
//! sandbox root before any pattern runs; a target escaping the root is
//! denied unconditionally.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use glob::{MatchOptions, Pattern};
use tracing::{debug, info};

use marshal_core::{ConfigError, ConfigScope, PermissionSettings, SourcedPattern};

use crate::tool::{ActionKind, ToolAccess};

/// Result of one permission evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// Only meaningful when `allowed`; a denied action is never escalated.
    pub requires_approval: bool,
    /// Cites the deciding rule and its scope, echoed verbatim to the model
    /// on denial.
    pub reason: String,
}

impl Verdict {
    fn denied(reason: String) -> Self {
        Self {
            allowed: false,
            requires_approval: false,
            reason,
        }
    }
}

struct CompiledRule {
    pattern: Pattern,
    text: String,
    scope: ConfigScope,
}

#[derive(Default)]
struct CompiledKind {
    allow: Vec<CompiledRule>,
    deny: Vec<CompiledRule>,
}

struct RuleSnapshot {
    read: CompiledKind,
    write: CompiledKind,
    execute: CompiledKind,
    require_approval: HashSet<String>,
}

impl RuleSnapshot {
    fn compile(
        permissions: &PermissionSettings,
        require_approval: &[String],
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            read: compile_kind(&permissions.read.allow, &permissions.read.deny)?,
            write: compile_kind(&permissions.write.allow, &permissions.write.deny)?,
            execute: compile_kind(&permissions.execute.allow, &permissions.execute.deny)?,
            require_approval: require_approval.iter().cloned().collect(),
        })
    }

    fn kind(&self, kind: ActionKind) -> &CompiledKind {
        match kind {
            ActionKind::Read => &self.read,
            ActionKind::Write => &self.write,
            ActionKind::Execute => &self.execute,
        }
    }

    fn approval_required(&self, kind: Option<ActionKind>, tool_name: &str) -> bool {
        kind.is_some_and(|k| self.require_approval.contains(k.as_str()))
            || self.require_approval.contains(tool_name)
    }
}

fn compile_kind(
    allow: &[SourcedPattern],
    deny: &[SourcedPattern],
) -> Result<CompiledKind, ConfigError> {
    Ok(CompiledKind {
        allow: allow.iter().map(compile_rule).collect::<Result<_, _>>()?,
        deny: deny.iter().map(compile_rule).collect::<Result<_, _>>()?,
    })
}

fn compile_rule(sourced: &SourcedPattern) -> Result<CompiledRule, ConfigError> {
    let pattern = Pattern::new(&sourced.pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: sourced.pattern.clone(),
        reason: e.to_string(),
    })?;
    Ok(CompiledRule {
        pattern,
        text: sourced.pattern.clone(),
        scope: sourced.scope,
    })
}

/// Path patterns: `*` stays within one segment, `**` spans segments.
fn path_match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Command patterns match the full command string including arguments, with
/// no separator significance, so `git *` matches `git status`.
fn command_match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

/// Evaluates requested actions against the compiled rule snapshot.
///
/// Evaluation is deterministic: a pure function of the snapshot and the
/// inputs. Reads clone the snapshot `Arc`; reload replaces it wholesale.
pub struct PermissionEngine {
    root: PathBuf,
    snapshot: RwLock<Arc<RuleSnapshot>>,
}

impl PermissionEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        permissions: &PermissionSettings,
        require_approval: &[String],
    ) -> Result<Self, ConfigError> {
        let root = root.into();
        // Canonical root so symlinked targets compare against the real tree.
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        let snapshot = RuleSnapshot::compile(permissions, require_approval)?;
        Ok(Self {
            root,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The permitted root all path targets must stay inside.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the rule snapshot atomically. In-flight evaluations keep the
    /// snapshot they already hold; a compile failure leaves the old rules
    /// active.
    pub fn reload(
        &self,
        permissions: &PermissionSettings,
        require_approval: &[String],
    ) -> Result<(), ConfigError> {
        let fresh = Arc::new(RuleSnapshot::compile(permissions, require_approval)?);
        *self
            .snapshot
            .write()
            .expect("permission snapshot lock poisoned") = fresh;
        info!("permission rules reloaded");
        Ok(())
    }

    /// Evaluate one classified access for one tool.
    pub fn evaluate(&self, access: &ToolAccess, tool_name: &str) -> Verdict {
        let snapshot = self
            .snapshot
            .read()
            .expect("permission snapshot lock poisoned")
            .clone();

        let verdict = match access {
            ToolAccess::None => Verdict {
                allowed: true,
                requires_approval: snapshot.approval_required(None, tool_name),
                reason: format!("'{tool_name}' performs no local resource access"),
            },
            ToolAccess::Read(path) => {
                self.evaluate_path(&snapshot, ActionKind::Read, path, tool_name)
            }
            ToolAccess::Write(path) => {
                self.evaluate_path(&snapshot, ActionKind::Write, path, tool_name)
            }
            ToolAccess::Execute(command) => {
                self.evaluate_command(&snapshot, command, tool_name)
            }
        };

        debug!(
            tool = tool_name,
            allowed = verdict.allowed,
            requires_approval = verdict.requires_approval,
            reason = %verdict.reason,
            "permission evaluated"
        );
        verdict
    }

    fn evaluate_path(
        &self,
        snapshot: &RuleSnapshot,
        kind: ActionKind,
        path: &Path,
        tool_name: &str,
    ) -> Verdict {
        let Some(resolved) = normalize_path(&self.root, path) else {
            return Verdict::denied(format!(
                "{kind} of '{}' denied: target escapes the permitted root",
                path.display()
            ));
        };
        let relative = resolved
            .strip_prefix(&self.root)
            .unwrap_or(&resolved)
            .to_string_lossy()
            .into_owned();
        self.evaluate_target(snapshot, kind, &relative, path_match_options(), tool_name)
    }

    fn evaluate_command(
        &self,
        snapshot: &RuleSnapshot,
        command: &str,
        tool_name: &str,
    ) -> Verdict {
        self.evaluate_target(
            snapshot,
            ActionKind::Execute,
            command,
            command_match_options(),
            tool_name,
        )
    }

    fn evaluate_target(
        &self,
        snapshot: &RuleSnapshot,
        kind: ActionKind,
        target: &str,
        options: MatchOptions,
        tool_name: &str,
    ) -> Verdict {
        let rules = snapshot.kind(kind);

        // 1. Deny overrides everything.
        for rule in &rules.deny {
            if rule.pattern.matches_with(target, options) {
                return Verdict::denied(format!(
                    "{kind} of '{target}' denied by {} rule '{}'",
                    rule.scope, rule.text
                ));
            }
        }

        // 2. An allow match is required; an empty allow list denies the kind.
        let Some(rule) = rules
            .allow
            .iter()
            .find(|r| r.pattern.matches_with(target, options))
        else {
            return Verdict::denied(format!("no allow rule permits {kind} of '{target}'"));
        };

        // 3. Approval escalation, by action kind or specific tool name.
        Verdict {
            allowed: true,
            requires_approval: snapshot.approval_required(Some(kind), tool_name),
            reason: format!(
                "{kind} of '{target}' allowed by {} rule '{}'",
                rule.scope, rule.text
            ),
        }
    }
}

/// Resolve a target against the root: make absolute, collapse `.` and `..`
/// lexically, then resolve symlinks through the deepest existing ancestor.
/// Returns `None` when the result leaves the root.
fn normalize_path(root: &Path, target: &Path) -> Option<PathBuf> {
    let absolute = if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    };

    let mut collapsed = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !collapsed.pop() {
                    return None;
                }
            }
            other => collapsed.push(other.as_os_str()),
        }
    }

    let resolved = resolve_existing_prefix(&collapsed);
    if resolved.starts_with(root) {
        Some(resolved)
    } else {
        None
    }
}

/// Canonicalize the deepest existing ancestor of `path` and reattach the
/// non-existing remainder, so symlinks are collapsed even for targets that
/// do not exist yet (e.g. a file about to be written).
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if existing.exists() {
            match std::fs::canonicalize(&existing) {
                Ok(mut canonical) => {
                    for segment in tail.iter().rev() {
                        canonical.push(segment);
                    }
                    return canonical;
                }
                Err(_) => break,
            }
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_owned());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marshal_core::KindRules;

    fn sourced(patterns: &[&str], scope: ConfigScope) -> Vec<SourcedPattern> {
        patterns
            .iter()
            .map(|p| SourcedPattern {
                pattern: p.to_string(),
                scope,
            })
            .collect()
    }

    fn kind_rules(allow: &[&str], deny: &[&str]) -> KindRules {
        KindRules {
            allow: sourced(allow, ConfigScope::Global),
            deny: sourced(deny, ConfigScope::Global),
        }
    }

    fn engine_with(
        root: &Path,
        permissions: PermissionSettings,
        require_approval: &[&str],
    ) -> PermissionEngine {
        let approval: Vec<String> = require_approval.iter().map(|s| s.to_string()).collect();
        PermissionEngine::new(root, &permissions, &approval).unwrap()
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["**/.env*"], &["**/.env*"]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        let verdict = engine.evaluate(&ToolAccess::Read(".env".into()), "file_read");
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("denied by"));
    }

    #[test]
    fn test_empty_allow_list_denies_kind() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), PermissionSettings::default(), &[]);

        let verdict = engine.evaluate(&ToolAccess::Read("README.md".into()), "file_read");
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("no allow rule"));
    }

    #[test]
    fn test_global_deny_cited_in_reason() {
        // Global config denies `**/.env*` for read, project adds no read rules.
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: KindRules {
                allow: sourced(&["**"], ConfigScope::Global),
                deny: sourced(&["**/.env*"], ConfigScope::Global),
            },
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        let verdict = engine.evaluate(&ToolAccess::Read(".env".into()), "file_read");
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("global rule '**/.env*'"));
    }

    #[test]
    fn test_command_allow_with_trailing_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            execute: kind_rules(&["git *"], &[]),
            ..Default::default()
        };

        let engine = engine_with(dir.path(), permissions.clone(), &[]);
        let verdict = engine.evaluate(
            &ToolAccess::Execute("git status".to_string()),
            "shell_execute",
        );
        assert!(verdict.allowed);
        assert!(!verdict.requires_approval);

        // Same rules, but shell_execute is in the approval set.
        let engine = engine_with(dir.path(), permissions, &["shell_execute"]);
        let verdict = engine.evaluate(
            &ToolAccess::Execute("git status".to_string()),
            "shell_execute",
        );
        assert!(verdict.allowed);
        assert!(verdict.requires_approval);
    }

    #[test]
    fn test_command_without_wildcard_requires_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            execute: kind_rules(&["git status"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        let allowed = engine.evaluate(
            &ToolAccess::Execute("git status".to_string()),
            "shell_execute",
        );
        assert!(allowed.allowed);

        let denied = engine.evaluate(
            &ToolAccess::Execute("git status --short".to_string()),
            "shell_execute",
        );
        assert!(!denied.allowed);
    }

    #[test]
    fn test_command_deny_overrides_broader_allow() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            execute: kind_rules(&["git *"], &["git push*"]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        assert!(
            engine
                .evaluate(&ToolAccess::Execute("git diff".into()), "shell_execute")
                .allowed
        );
        assert!(
            !engine
                .evaluate(
                    &ToolAccess::Execute("git push origin main".into()),
                    "shell_execute"
                )
                .allowed
        );
    }

    #[test]
    fn test_single_wildcard_stays_within_segment() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["src/*"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        assert!(
            engine
                .evaluate(&ToolAccess::Read("src/main.rs".into()), "file_read")
                .allowed
        );
        assert!(
            !engine
                .evaluate(&ToolAccess::Read("src/nested/mod.rs".into()), "file_read")
                .allowed
        );
    }

    #[test]
    fn test_double_wildcard_spans_segments() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["src/**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        assert!(
            engine
                .evaluate(
                    &ToolAccess::Read("src/nested/deep/mod.rs".into()),
                    "file_read"
                )
                .allowed
        );
    }

    #[test]
    fn test_traversal_escape_denied_despite_allow_all() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        let verdict = engine.evaluate(&ToolAccess::Read("../../etc/passwd".into()), "file_read");
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("escapes the permitted root"));
    }

    #[test]
    fn test_absolute_path_outside_root_denied() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        let verdict = engine.evaluate(&ToolAccess::Read("/etc/passwd".into()), "file_read");
        assert!(!verdict.allowed);
    }

    #[test]
    fn test_interior_traversal_collapses_and_allows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["src/**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        // Collapses to src/main.rs, which stays inside the root.
        let verdict = engine.evaluate(
            &ToolAccess::Read("src/nested/../main.rs".into()),
            "file_read",
        );
        assert!(verdict.allowed);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_denied() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            root.path().join("link.txt"),
        )
        .unwrap();

        let permissions = PermissionSettings {
            read: kind_rules(&["**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(root.path(), permissions, &[]);

        let verdict = engine.evaluate(&ToolAccess::Read("link.txt".into()), "file_read");
        assert!(!verdict.allowed);
    }

    #[test]
    fn test_approval_by_action_kind() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            write: kind_rules(&["**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &["write"]);

        let verdict = engine.evaluate(&ToolAccess::Write("out.txt".into()), "file_write");
        assert!(verdict.allowed);
        assert!(verdict.requires_approval);
    }

    #[test]
    fn test_unscoped_access_checks_approval_by_tool_name() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), PermissionSettings::default(), &["web_search"]);

        let verdict = engine.evaluate(&ToolAccess::None, "web_search");
        assert!(verdict.allowed);
        assert!(verdict.requires_approval);

        let verdict = engine.evaluate(&ToolAccess::None, "other_tool");
        assert!(verdict.allowed);
        assert!(!verdict.requires_approval);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["**"], &["**/.env*"]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &["read"]);

        let access = ToolAccess::Read("docs/notes.md".into());
        let first = engine.evaluate(&access, "file_read");
        let second = engine.evaluate(&access, "file_read");
        assert_eq!(first, second);
    }

    #[test]
    fn test_reload_swaps_rules() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(dir.path(), PermissionSettings::default(), &[]);
        let access = ToolAccess::Read("README.md".into());
        assert!(!engine.evaluate(&access, "file_read").allowed);

        let permissions = PermissionSettings {
            read: kind_rules(&["**"], &[]),
            ..Default::default()
        };
        engine.reload(&permissions, &[]).unwrap();
        assert!(engine.evaluate(&access, "file_read").allowed);
    }

    #[test]
    fn test_reload_failure_keeps_old_rules() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = PermissionSettings {
            read: kind_rules(&["**"], &[]),
            ..Default::default()
        };
        let engine = engine_with(dir.path(), permissions, &[]);

        let bad = PermissionSettings {
            read: kind_rules(&["[invalid"], &[]),
            ..Default::default()
        };
        assert!(engine.reload(&bad, &[]).is_err());

        // Old snapshot still active.
        let verdict = engine.evaluate(&ToolAccess::Read("README.md".into()), "file_read");
        assert!(verdict.allowed);
    }
}
