use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::UserDirs;
use serde::Serialize;
use tempfile::Builder;

use crate::domain::{DifferentialRecord, GroupPair};
use crate::error::KiraError;

/// A named CSV column; `render` produces the cell text verbatim.
pub struct Column<R> {
    pub name: &'static str,
    pub render: fn(&R) -> String,
}

pub fn differential_columns() -> Vec<Column<DifferentialRecord>> {
    vec![
        Column {
            name: "Gene",
            render: |record| record.gene.clone(),
        },
        Column {
            name: "LogFC",
            render: |record| record.log_fc.to_string(),
        },
        Column {
            name: "P-value",
            render: |record| record.p_value.to_string(),
        },
        Column {
            name: "Adj P-value",
            render: |record| {
                record
                    .adj_p_value
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            },
        },
    ]
}

/// Encodes `records` in the order given. Callers filter and sort first.
pub fn encode_table<R>(records: &[R], columns: &[Column<R>]) -> Result<String, KiraError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(columns.iter().map(|column| column.name))
        .map_err(|err| KiraError::Export(err.to_string()))?;
    for record in records {
        writer
            .write_record(columns.iter().map(|column| (column.render)(record)))
            .map_err(|err| KiraError::Export(err.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| KiraError::Export(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| KiraError::Export(err.to_string()))
}

pub fn export_file_name(pair: &GroupPair) -> String {
    format!(
        "dea_results_{}_vs_{}.csv",
        file_safe(pair.group1.as_str()),
        file_safe(pair.group2.as_str())
    )
}

fn file_safe(value: &str) -> String {
    value.replace(['/', '\\'], "_")
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub file_name: String,
    pub location: String,
    pub rows: usize,
    pub bytes: usize,
}

/// Where an encoded export ends up; returns a displayable location.
pub trait ExportSink {
    fn save(&self, file_name: &str, contents: &str) -> Result<String, KiraError>;
}

#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: Utf8PathBuf,
}

impl DirectorySink {
    pub fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    /// The user's download directory, or the working directory when the
    /// platform has none.
    pub fn downloads() -> Result<Self, KiraError> {
        let dir = match UserDirs::new().and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf()))
        {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|err| KiraError::Filesystem(err.to_string()))?,
        };
        let dir = Utf8PathBuf::from_path_buf(dir)
            .map_err(|_| KiraError::Filesystem("invalid download directory path".to_string()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }
}

impl ExportSink for DirectorySink {
    fn save(&self, file_name: &str, contents: &str) -> Result<String, KiraError> {
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".kira-od-export")
            .tempfile_in(self.dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(contents.as_bytes())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let target = self.dir.join(file_name);
        temp.persist(target.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(target.to_string())
    }
}
