//! CSV export of a [`ResultSet`].
//!
//! The file is rendered in memory, written next to the destination as
//! `<name>.partial` and renamed into place, so a failed write never leaves a
//! truncated CSV behind. An existing file at the destination is replaced.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use tokio::fs;
use tracing::{error, info, instrument, warn};

use crate::error::ExportError;
use crate::models::{PROFILE_FIELDS, ResultSet};
use crate::utils::{ensure_parent_dir, partial_path};

/// Header row: every schema column, then extra columns in first-seen order.
pub fn columns(records: &ResultSet) -> Vec<String> {
    PROFILE_FIELDS
        .iter()
        .copied()
        .chain(records.iter().flat_map(|r| r.extra_columns()))
        .unique()
        .map(str::to_string)
        .collect()
}

/// Encode `records` as UTF-8 CSV with one header row.
pub fn render(records: &ResultSet) -> Result<Vec<u8>, ExportError> {
    let columns = columns(records);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for record in records.iter() {
        writer.write_record(columns.iter().map(|c| record.cell(c)))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

/// Write `records` to `path`.
///
/// Returns `Ok(None)` without touching the filesystem when there is nothing
/// to export.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = records.len()))]
pub async fn export(records: &ResultSet, path: &Path) -> Result<Option<PathBuf>, ExportError> {
    if records.is_empty() {
        warn!("No profile data to export");
        return Ok(None);
    }

    let bytes = render(records)?;
    ensure_parent_dir(path).await?;

    let partial = partial_path(path);
    let written = async {
        fs::write(&partial, &bytes).await?;
        fs::rename(&partial, path).await
    }
    .await;
    if let Err(e) = written {
        error!(error = %e, "Failed to export data");
        let _ = fs::remove_file(&partial).await;
        return Err(e.into());
    }

    info!(profiles = records.len(), "Exported profiles to CSV");
    Ok(Some(path.to_path_buf()))
}
