use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use sitectl_core::ActionPlan;

/// Request text for the automation: the site line, then one line per action.
pub fn render_action_request(dirroot: &Path, plan: &ActionPlan) -> String {
    let mut body = format!("site {}\n", dirroot.display());
    for request in plan.ordered() {
        body.push_str(&format!("{} {}\n", request.action, request.full_name));
    }
    body
}

/// Writes the plan into `request_dir` so the automation never sees a partial file.
///
/// Returns `None` without touching the directory when the plan is empty.
pub fn write_action_request(
    request_dir: &Path,
    dirroot: &Path,
    plan: &ActionPlan,
) -> Result<Option<PathBuf>> {
    if plan.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(request_dir)
        .with_context(|| format!("failed to create {}", request_dir.display()))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_nanos();
    let file_name = format!("addon_{nanos}_{}", std::process::id());
    let part_path = request_dir.join(format!(".{file_name}.part"));
    let path = request_dir.join(&file_name);

    fs::write(&part_path, render_action_request(dirroot, plan))
        .with_context(|| format!("failed to write action request: {}", part_path.display()))?;
    if let Err(err) = fs::rename(&part_path, &path) {
        let _ = fs::remove_file(&part_path);
        return Err(err)
            .with_context(|| format!("failed to move action request into place: {}", path.display()));
    }

    tracing::info!(path = %path.display(), actions = plan.len(), "wrote addon action request");
    Ok(Some(path))
}
