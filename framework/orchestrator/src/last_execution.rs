use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

/// The most recently produced run across all scenarios, independent of how it was started.
/// Display-only; recomputed wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastExecutionInfo {
    pub scenario_name: String,
    pub scenario_path: PathBuf,
    /// First path segment under the output folder on the way to the latest-modified entry.
    /// `None` when the latest entry is the output folder itself.
    pub run_path: Option<PathBuf>,
    pub run_name: Option<String>,
    pub timestamp_ms: u64,
}

/// Scan every scenario folder under `base_path` for the single most recently modified
/// entry anywhere below its `output_folder_name` subfolder.
///
/// The globally greatest modification time wins; on a tie the first scenario found wins,
/// which is deterministic because scenario folders are visited in name order. Returns
/// `None` when no scenario has any output. Cost is O(total files under all output
/// folders), acceptable for a display-only computation off every hot path.
pub fn resolve_last_execution(
    base_path: &Path,
    output_folder_name: &str,
) -> Option<LastExecutionInfo> {
    let mut scenario_dirs: Vec<PathBuf> = std::fs::read_dir(base_path)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    scenario_dirs.sort();

    let mut best: Option<LastExecutionInfo> = None;
    for scenario_path in scenario_dirs {
        let Some(scenario_name) = scenario_path.file_name().map(|n| n.to_string_lossy().to_string())
        else {
            continue;
        };
        let output_path = scenario_path.join(output_folder_name);
        if !output_path.is_dir() {
            continue;
        }

        if let Some((latest_path, timestamp_ms)) = latest_entry(&output_path) {
            let run_path = run_folder(&output_path, &latest_path);
            let run_name = run_path
                .as_deref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string());
            let candidate = LastExecutionInfo {
                scenario_name,
                scenario_path: scenario_path.clone(),
                run_path,
                run_name,
                timestamp_ms,
            };
            match &best {
                Some(current) if current.timestamp_ms >= candidate.timestamp_ms => {}
                _ => best = Some(candidate),
            }
        }
    }
    best
}

/// The entry (file or folder) with the greatest modification time anywhere under `root`,
/// including `root` itself. Unreadable entries are skipped.
fn latest_entry(root: &Path) -> Option<(PathBuf, u64)> {
    let mut best: Option<(PathBuf, u64)> = None;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let timestamp_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        match &best {
            Some((_, current)) if *current >= timestamp_ms => {}
            _ => best = Some((entry.path().to_path_buf(), timestamp_ms)),
        }
    }
    best
}

/// The run folder for a latest-modified entry: the first path segment directly under the
/// output folder on the path to that entry, not necessarily the leaf itself.
fn run_folder(output_path: &Path, latest: &Path) -> Option<PathBuf> {
    let relative = latest.strip_prefix(output_path).ok()?;
    let first = relative.components().next()?;
    Some(output_path.join(first.as_os_str()))
}
