use std::fs;

use camino::Utf8Path;
use zip::ZipArchive;

use crate::error::VetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub light_curves: usize,
}

/// Opens the archive and walks its central directory without extracting
/// anything. Unreadable archives never reach the network.
pub fn inspect_archive(path: &Utf8Path) -> Result<ArchiveSummary, VetError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|_| VetError::FileRead(path.as_std_path().to_path_buf()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| VetError::InvalidArchive(format!("{path}: {err}")))?;

    let mut summary = ArchiveSummary {
        entries: 0,
        light_curves: 0,
    };
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| VetError::InvalidArchive(format!("{path}: {err}")))?;
        if entry.is_dir() {
            continue;
        }
        summary.entries += 1;
        let is_fits = entry
            .enclosed_name()
            .and_then(|name| {
                name.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("fits") || ext.eq_ignore_ascii_case("fit"))
            })
            .unwrap_or(false);
        if is_fits {
            summary.light_curves += 1;
        }
    }
    Ok(summary)
}
