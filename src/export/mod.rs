//! Named row collections to CSV files, one per sheet.

pub mod format;

use crate::assembler::Dataset;
use crate::config::ExportConfig;
use crate::models::{ColumnDefinition, ExcelFormat, ORIGIN_FIELD, RowRecord};
use anyhow::{Context, Result};
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Destination for named row collections.
pub trait SheetWriter {
    fn write_sheet(&mut self, name: &str, rows: &[&RowRecord]) -> Result<()>;
}

/// Header union in first-seen order, `Origin` excluded, and the cell values
/// of each row under those headers, cleaned column by column.
pub fn render_sheet(rows: &[&RowRecord], formats: &HashMap<String, ExcelFormat>) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if key != ORIGIN_FIELD && !headers.iter().any(|h| h == key) {
                headers.push(key.to_string());
            }
        }
    }

    let columns: Vec<Vec<String>> = headers
        .iter()
        .map(|h| {
            let values: Vec<&str> = rows.iter().map(|row| row.get(h).unwrap_or_default()).collect();
            match formats.get(h) {
                Some(fmt) => format::clean_column(&values, *fmt),
                None => values.iter().map(|v| v.to_string()).collect(),
            }
        })
        .collect();

    let records = (0..rows.len())
        .map(|i| columns.iter().map(|col| col[i].clone()).collect())
        .collect();
    (headers, records)
}

/// Writes `{output_dir}/{file_stem}[_{stamp}]_{sheet}.csv`.
pub struct CsvWorkbook {
    dir: PathBuf,
    stem: String,
    formats: HashMap<String, ExcelFormat>,
    written: Vec<PathBuf>,
}

impl CsvWorkbook {
    /// `columns` supplies the per-column export formats; the first
    /// definition of a name wins.
    pub fn new<'a>(cfg: &ExportConfig, columns: impl IntoIterator<Item = &'a ColumnDefinition>) -> Self {
        let stem = if cfg.timestamped {
            format!("{}_{}", cfg.file_stem, Local::now().format("%Y%m%d_%H%M%S"))
        } else {
            cfg.file_stem.clone()
        };
        let mut formats = HashMap::new();
        for col in columns {
            formats.entry(col.name.clone()).or_insert(col.excel_format);
        }
        Self {
            dir: cfg.output_dir.clone(),
            stem,
            formats,
            written: Vec::new(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.written
    }
}

impl SheetWriter for CsvWorkbook {
    fn write_sheet(&mut self, name: &str, rows: &[&RowRecord]) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| format!("cannot create {:?}", self.dir))?;
        let path = self.dir.join(format!("{}_{}.csv", self.stem, name));

        let (headers, records) = render_sheet(rows, &self.formats);
        let mut wtr = csv::Writer::from_path(&path).with_context(|| format!("cannot open {:?}", path))?;
        wtr.write_record(&headers)?;
        for record in &records {
            wtr.write_record(record)?;
        }
        wtr.flush().with_context(|| format!("cannot flush {:?}", path))?;

        info!("Sheet {} → {:?} ({} rows)", name, path, records.len());
        self.written.push(path);
        Ok(())
    }
}

/// Hand every non-empty collection to `writer`. Returns the sheets written.
pub fn export_dataset(writer: &mut dyn SheetWriter, data: &Dataset) -> Result<usize> {
    let mut written = 0;
    for (name, rows) in data.sheets() {
        if rows.is_empty() {
            debug!("sheet {} is empty, skipped", name);
            continue;
        }
        writer
            .write_sheet(name, &rows)
            .with_context(|| format!("failed to export sheet {name}"))?;
        written += 1;
    }
    Ok(written)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
