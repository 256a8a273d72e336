use crate::utils::constants::EVENT_FILE_SUFFIX;
use std::path::{Path, PathBuf};

/// Output name for a transformed granule: `OR_GLM-L2-LCFA_..._c2023.nc` -> `OR_GLM-L2-LCFA_..._c2023.event.csv`
pub fn event_file_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    format!("{}{}", stem, EVENT_FILE_SUFFIX)
}

pub fn is_event_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(EVENT_FILE_SUFFIX))
        .unwrap_or(false)
}

/// Split a file name into (base, extension) where the extension keeps every
/// dotted part after the first, so `a.event.csv` -> (`a`, `.event.csv`).
fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.find('.') {
        Some(0) | None => (file_name, ""),
        Some(idx) => file_name.split_at(idx),
    }
}

/// First path in `dir` for `file_name` that does not exist yet.
/// Collisions get `_v1`, `_v2`, ... appended before the extension.
pub fn versioned_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (base, ext) = split_name(file_name);
    let mut version = 1;
    loop {
        let candidate = dir.join(format!("{}_v{}{}", base, version, ext));
        if !candidate.exists() {
            return candidate;
        }
        version += 1;
    }
}
