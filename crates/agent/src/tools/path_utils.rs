//! Workspace confinement for file and shell tools

use std::path::{Component, Path, PathBuf};

use super::ToolError;
use reagent_config::expand_tilde;

/// Resolve `path` against the workspace and reject anything that escapes it.
///
/// Relative paths are joined to the workspace, `~` is expanded, existing
/// paths are canonicalized (resolving symlinks), and non-existent paths are
/// resolved through their nearest existing ancestor with `..` folded away.
pub async fn validate_workspace_path(
    path: &str,
    workspace_root: &Path,
) -> Result<PathBuf, ToolError> {
    let expanded = if path.starts_with('/') || path.starts_with('~') {
        expand_tilde(path)
    } else {
        workspace_root.join(path)
    };

    let absolute = resolve(&expanded).await?;
    let canonical_workspace = tokio::fs::canonicalize(workspace_root)
        .await
        .unwrap_or_else(|_| normalize(workspace_root));

    if !is_path_within_workspace(&absolute, &canonical_workspace) {
        return Err(ToolError::OutsideWorkspace {
            path: path.to_string(),
            workspace: canonical_workspace.display().to_string(),
        });
    }

    Ok(absolute)
}

async fn resolve(path: &Path) -> Result<PathBuf, ToolError> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    if let Ok(canonical) = tokio::fs::canonicalize(&path).await {
        return Ok(canonical);
    }

    // Canonicalize the deepest existing ancestor, then re-append the rest
    let normalized = normalize(&path);
    let mut existing = normalized.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = tokio::fs::canonicalize(existing)
        .await
        .unwrap_or_else(|_| existing.to_path_buf());
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Lexically fold `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_path_within_workspace(path: &Path, workspace: &Path) -> bool {
    let path_components: Vec<_> = path.components().collect();
    let workspace_components: Vec<_> = workspace.components().collect();

    if path_components.len() < workspace_components.len() {
        return false;
    }

    workspace_components
        .iter()
        .zip(path_components.iter())
        .all(|(w, p)| w == p)
}
