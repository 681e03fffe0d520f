//! Built-in local executors for Runwright.
//!
//! The engine only knows the [`Shell`](runwright_core::capability::Shell) and
//! [`Editor`](runwright_core::capability::Editor) traits; this crate provides
//! host-side implementations: a local shell runner and a workspace-scoped
//! file editor that applies V4A diffs.

pub mod diff;
pub mod editor;
pub mod shell;

pub use editor::WorkspaceEditor;
pub use shell::LocalShell;

/// Base commands the default shell allows.
pub const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "echo", "pwd", "date", "wc", "grep", "find", "which", "git",
];

/// A shell restricted to [`SAFE_COMMANDS`].
pub fn default_shell() -> LocalShell {
    LocalShell::new(SAFE_COMMANDS.iter().map(|c| c.to_string()).collect())
}
