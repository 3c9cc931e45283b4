//! Loading a team's raw table from its configured data source

use crate::error::{CalcError, CalcResult};
use crate::types::{Column, ColumnValue, Table};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `data_source` section of a team config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub options: CsvOptions,
}

/// Reader options for `local_csv` sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvOptions {
    /// First record holds column names; otherwise columns are named `0..n`
    #[serde(default = "default_header")]
    pub header: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_header() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            header: default_header(),
            delimiter: default_delimiter(),
            encoding: default_encoding(),
        }
    }
}

/// Reads raw tables; relative source paths resolve against `project_root`
#[derive(Debug, Clone)]
pub struct DataReader {
    project_root: PathBuf,
}

impl DataReader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.project_root.join(candidate)
        }
    }

    /// Load the table described by a data source section.
    ///
    /// Every field is read as text; empty fields become missing values.
    pub fn load(&self, source: &DataSourceConfig) -> CalcResult<Table> {
        match source.kind.as_str() {
            "local_csv" => {
                let path = self.csv_path(source)?;
                self.read_csv(&path, &source.options)
            }
            other => Err(CalcError::DataSource(format!(
                "Unsupported data source kind: {}",
                other
            ))),
        }
    }

    fn csv_path(&self, source: &DataSourceConfig) -> CalcResult<PathBuf> {
        let raw = source
            .path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| CalcError::DataSource("data_source.path is not set".to_string()))?;

        let path = self.resolve_path(raw);
        if !path.exists() {
            return Err(CalcError::DataSource(format!(
                "CSV file does not exist: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Read a CSV file into a text table
    pub fn read_csv(&self, path: &Path, options: &CsvOptions) -> CalcResult<Table> {
        let file = File::open(path).map_err(|e| read_failure(path, e))?;
        let table = read_csv_from(file, options).map_err(|e| match e {
            CalcError::DataSource(_) => e,
            other => read_failure(path, other),
        })?;
        info!(
            path = %path.display(),
            rows = table.row_count(),
            columns = table.columns().len(),
            "CSV loaded"
        );
        Ok(table)
    }
}

fn read_failure(path: &Path, err: impl std::fmt::Display) -> CalcError {
    CalcError::DataSource(format!("Failed to read CSV: {} - {}", path.display(), err))
}

/// Parse CSV text from any reader
pub fn read_csv_from<R: Read>(reader: R, options: &CsvOptions) -> CalcResult<Table> {
    if !options.encoding.eq_ignore_ascii_case("utf-8") && !options.encoding.eq_ignore_ascii_case("utf8")
    {
        return Err(CalcError::DataSource(format!(
            "Unsupported CSV encoding: {}",
            options.encoding
        )));
    }
    let delimiter = u8::try_from(options.delimiter).map_err(|_| {
        CalcError::DataSource(format!(
            "CSV delimiter must be a single ASCII character, got '{}'",
            options.delimiter
        ))
    })?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(options.header)
        .from_reader(reader);

    let mut names: Vec<String> = if options.header {
        csv_reader.headers()?.iter().map(str::to_string).collect()
    } else {
        Vec::new()
    };

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for result in csv_reader.records() {
        let record = result?;
        if names.is_empty() && !options.header {
            names = (0..record.len()).map(|i| i.to_string()).collect();
            cells = vec![Vec::new(); names.len()];
        }
        for (col, field) in record.iter().enumerate() {
            if let Some(column) = cells.get_mut(col) {
                column.push(Some(field).filter(|f| !f.is_empty()).map(str::to_string));
            }
        }
    }

    debug!(columns = names.len(), "CSV parsed");
    let table = Table::from_columns(
        names
            .into_iter()
            .zip(cells)
            .map(|(name, values)| Column::new(name, ColumnValue::Text(values))),
    );
    table.validate_lengths()?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn local_csv(path: &str) -> DataSourceConfig {
        DataSourceConfig {
            kind: "local_csv".to_string(),
            path: Some(path.to_string()),
            options: CsvOptions::default(),
        }
    }

    #[test]
    fn test_read_csv_with_header() {
        let table = read_csv_from(
            "name,age,score\nAlice,25,90.5\nBob,30,\n".as_bytes(),
            &CsvOptions::default(),
        )
        .unwrap();

        assert_eq!(table.column_names(), vec!["name", "age", "score"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.column("name").unwrap().values,
            ColumnValue::text(&["Alice", "Bob"])
        );
        assert_eq!(
            table.column("score").unwrap().values,
            ColumnValue::Text(vec![Some("90.5".to_string()), None])
        );
    }

    #[test]
    fn test_read_csv_without_header_uses_positions() {
        let options = CsvOptions {
            header: false,
            ..CsvOptions::default()
        };
        let table = read_csv_from("Alice,25\nBob,30\n".as_bytes(), &options).unwrap();
        assert_eq!(table.column_names(), vec!["0", "1"]);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_read_csv_custom_delimiter() {
        let options = CsvOptions {
            delimiter: ';',
            ..CsvOptions::default()
        };
        let table = read_csv_from("a;b\n1;2\n".as_bytes(), &options).unwrap();
        assert_eq!(table.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_read_csv_rejects_unknown_encoding() {
        let options = CsvOptions {
            encoding: "shift_jis".to_string(),
            ..CsvOptions::default()
        };
        let err = read_csv_from("a\n1\n".as_bytes(), &options).unwrap_err();
        assert!(matches!(err, CalcError::DataSource(msg) if msg.contains("shift_jis")));
    }

    #[test]
    fn test_read_csv_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invalid.csv");
        std::fs::write(&path, b"name,value\n\xff\xfe\x00invalid,1\n").unwrap();

        let err = DataReader::new(dir.path())
            .read_csv(&path, &CsvOptions::default())
            .unwrap_err();
        assert!(matches!(err, CalcError::DataSource(msg) if msg.contains("Failed to read CSV")));
    }

    #[test]
    fn test_resolve_path() {
        let reader = DataReader::new("/project");
        assert_eq!(
            reader.resolve_path("data/sales.csv"),
            PathBuf::from("/project/data/sales.csv")
        );
        assert_eq!(reader.resolve_path("/abs/x.csv"), PathBuf::from("/abs/x.csv"));
    }

    #[test]
    fn test_load_local_csv_relative_to_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/sales.csv"), "qty,price\n2,10\n3,20\n").unwrap();

        let table = DataReader::new(dir.path())
            .load(&local_csv("data/sales.csv"))
            .unwrap();
        assert_eq!(table.column_names(), vec!["qty", "price"]);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let reader = DataReader::new(dir.path());

        let missing = reader.load(&local_csv("nope.csv")).unwrap_err();
        assert!(matches!(missing, CalcError::DataSource(msg) if msg.contains("does not exist")));

        let mut no_path = local_csv("");
        no_path.path = None;
        assert!(matches!(
            reader.load(&no_path),
            Err(CalcError::DataSource(msg)) if msg.contains("path")
        ));

        let mut s3 = local_csv("x.csv");
        s3.kind = "s3".to_string();
        assert!(matches!(
            reader.load(&s3),
            Err(CalcError::DataSource(msg)) if msg.contains("s3")
        ));
    }

    #[test]
    fn test_data_source_config_defaults() {
        let source: DataSourceConfig =
            serde_yaml::from_str("kind: local_csv\npath: data/a.csv\n").unwrap();
        assert_eq!(source.options, CsvOptions::default());
        assert!(source.options.header);

        let source: DataSourceConfig =
            serde_yaml::from_str("kind: local_csv\npath: a.csv\noptions:\n  header: false\n")
                .unwrap();
        assert!(!source.options.header);
        assert_eq!(source.options.delimiter, ',');
    }
}
