//! ---
//! gs_section: "03-persistence-logging"
//! gs_subsection: "module"
//! gs_type: "source"
//! gs_scope: "code"
//! gs_description: "Persistence abstractions and storage bindings."
//! gs_version: "v0.0.0-prealpha"
//! gs_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::Result;

/// Write flat rows to a CSV file with a header derived from the row's field names.
/// Returns the number of rows written.
pub fn export_csv<R, I>(path: &Path, rows: I) -> Result<usize>
where
    R: Serialize,
    I: IntoIterator<Item = R>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    let mut count = 0usize;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = count, "csv export written");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Row {
        technique: &'static str,
        impact_score: f64,
        failure: Option<String>,
    }

    #[test]
    fn rows_are_written_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rows = vec![
            Row {
                technique: "inject_load",
                impact_score: 12.5,
                failure: None,
            },
            Row {
                technique: "spoof_data",
                impact_score: 0.0,
                failure: Some("rate limited".into()),
            },
        ];
        assert_eq!(export_csv(&path, rows).unwrap(), 2);
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("technique,impact_score,failure"));
        assert_eq!(lines.next(), Some("inject_load,12.5,"));
        assert_eq!(lines.next(), Some("spoof_data,0.0,rate limited"));
    }
}
