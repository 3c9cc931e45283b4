//! Declared column layout for a team's data and conversion of raw tables
//!
//! Data sources deliver every field as text. A [`DataFormat`] names the
//! expected columns with their type, requiredness, optional parse format and
//! default; [`DataValidator`] reports problems and converts the raw table into
//! typed columns the engine can compute on.

use crate::error::{CalcError, CalcResult};
use crate::types::{parse_timestamp, Column, ColumnValue, Table};
use serde::Serialize;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Type a declared column is converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Datetime,
    Bool,
}

impl ColumnType {
    pub const ALL: [ColumnType; 5] = [
        ColumnType::String,
        ColumnType::Int,
        ColumnType::Float,
        ColumnType::Datetime,
        ColumnType::Bool,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Datetime => "datetime",
            ColumnType::Bool => "bool",
        }
    }
}

impl FromStr for ColumnType {
    type Err = CalcError;

    fn from_str(s: &str) -> CalcResult<Self> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = ColumnType::ALL.iter().map(|t| t.name()).collect();
                CalcError::Validation(format!(
                    "Unsupported column type '{}' (expected one of: {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub required: bool,
    /// strftime layout for datetime columns
    pub format: Option<String>,
    /// Value substituted for missing cells before conversion
    pub default: Option<String>,
    pub description: String,
}

impl ColumnDefinition {
    /// A required column with no format or default
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> CalcResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CalcError::Validation("Column name is required".to_string()));
        }
        Ok(Self {
            name,
            column_type,
            required: true,
            format: None,
            default: None,
            description: String::new(),
        })
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Non-empty list of uniquely named column definitions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFormat {
    columns: Vec<ColumnDefinition>,
}

impl DataFormat {
    pub fn new(columns: Vec<ColumnDefinition>) -> CalcResult<Self> {
        if columns.is_empty() {
            return Err(CalcError::Validation(
                "At least one column definition is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(CalcError::Validation(format!(
                    "Duplicate column name '{}'",
                    column.name
                )));
            }
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn get_column_by_name(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.required)
    }
}

/// Checks and converts raw tables against a [`DataFormat`]
#[derive(Debug, Clone)]
pub struct DataValidator {
    format: DataFormat,
}

impl DataValidator {
    pub fn new(format: DataFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &DataFormat {
        &self.format
    }

    /// Collect every problem found in the table; empty means valid.
    ///
    /// Reports missing required columns, missing values in required columns
    /// and cells that cannot be converted to the declared type.
    pub fn validate_table(&self, table: &Table) -> Vec<String> {
        let mut errors = Vec::new();

        let missing: Vec<&str> = self
            .format
            .required_columns()
            .filter(|def| !table.contains_column(&def.name))
            .map(|def| def.name.as_str())
            .collect();
        if !missing.is_empty() {
            errors.push(format!("Missing required columns: {}", missing.join(", ")));
        }

        for def in self.format.required_columns() {
            if let Some(column) = table.column(&def.name) {
                let count = column.values.missing_count();
                if count > 0 {
                    errors.push(format!(
                        "Required column '{}' has {} missing values",
                        def.name, count
                    ));
                }
            }
        }

        for def in self.format.columns() {
            if let Some(column) = table.column(&def.name) {
                if let Err(e) = convert_column(&column.values, def) {
                    errors.push(format!(
                        "Column '{}' cannot be converted to {}: {}",
                        def.name, def.column_type, e
                    ));
                }
            }
        }

        errors
    }

    /// Convert every declared column present in the table.
    ///
    /// Defaults fill missing cells first. Undeclared columns pass through
    /// unchanged and column order is preserved.
    pub fn convert_table(&self, table: &Table) -> CalcResult<Table> {
        let mut converted = table.clone();
        for def in self.format.columns() {
            let Some(column) = table.column(&def.name) else {
                continue;
            };
            let values = convert_column(&column.values, def).map_err(|e| {
                CalcError::Validation(format!(
                    "Failed to convert column '{}' to {}: {}",
                    def.name, def.column_type, e
                ))
            })?;
            debug!(column = %def.name, kind = %def.column_type, "column converted");
            converted.add_column(Column::new(def.name.clone(), values));
        }
        Ok(converted)
    }
}

/// Convert one column, failing on the first cell that does not fit
fn convert_column(values: &ColumnValue, def: &ColumnDefinition) -> Result<ColumnValue, String> {
    // Already typed input only needs the integer check
    match (def.column_type, values) {
        (ColumnType::Float, ColumnValue::Number(_))
        | (ColumnType::Datetime, ColumnValue::Date(_))
        | (ColumnType::Bool, ColumnValue::Boolean(_))
            if def.default.is_none() =>
        {
            return Ok(values.clone())
        }
        (ColumnType::Int, ColumnValue::Number(nums)) if def.default.is_none() => {
            return match nums.iter().position(|n| !n.is_nan() && n.fract() != 0.0) {
                Some(row) => Err(format!(
                    "row {}: '{}' is not an integer",
                    row + 1,
                    values.cell_text(row)
                )),
                None => Ok(values.clone()),
            };
        }
        _ => {}
    }

    let cells: Vec<Option<String>> = (0..values.len())
        .map(|row| {
            if values.is_missing(row) {
                def.default.clone()
            } else {
                Some(values.cell_text(row))
            }
        })
        .collect();

    match def.column_type {
        ColumnType::String => Ok(ColumnValue::Text(cells)),
        ColumnType::Int => convert_cells(&cells, parse_int).map(ColumnValue::Number),
        ColumnType::Float => convert_cells(&cells, parse_float).map(ColumnValue::Number),
        ColumnType::Bool => cells
            .iter()
            .enumerate()
            .map(|(row, cell)| match cell {
                None => Ok(false),
                Some(text) => parse_bool(text)
                    .ok_or_else(|| format!("row {}: '{}' is not a boolean", row + 1, text)),
            })
            .collect::<Result<Vec<bool>, String>>()
            .map(ColumnValue::Boolean),
        ColumnType::Datetime => cells
            .iter()
            .enumerate()
            .map(|(row, cell)| match cell {
                None => Ok(None),
                Some(text) => parse_timestamp(text, def.format.as_deref())
                    .map(Some)
                    .ok_or_else(|| format!("row {}: '{}' is not a valid datetime", row + 1, text)),
            })
            .collect::<Result<Vec<_>, String>>()
            .map(ColumnValue::Date),
    }
}

fn convert_cells(
    cells: &[Option<String>],
    parse: fn(&str) -> Option<f64>,
) -> Result<Vec<f64>, String> {
    cells
        .iter()
        .enumerate()
        .map(|(row, cell)| match cell {
            None => Ok(f64::NAN),
            Some(text) => parse(text.trim())
                .ok_or_else(|| format!("row {}: '{}' is not numeric", row + 1, text)),
        })
        .collect()
}

fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok()
}

fn parse_int(text: &str) -> Option<f64> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(n as f64);
    }
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && n.fract() == 0.0)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "true" | "True" | "TRUE" | "1" => Some(true),
        "false" | "False" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// Build a [`DataFormat`] from a decoded `data_format` section
pub fn parse_data_format(section: &Value) -> CalcResult<DataFormat> {
    let columns = match section.get("columns") {
        Some(Value::Sequence(columns)) => columns,
        Some(_) => {
            return Err(CalcError::Config(
                "'data_format.columns' must be a list".to_string(),
            ))
        }
        None => {
            return Err(CalcError::Config(
                "Data format requires a 'columns' section".to_string(),
            ))
        }
    };

    let definitions = columns
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_column_definition(index, entry))
        .collect::<CalcResult<Vec<_>>>()?;

    DataFormat::new(definitions)
}

fn parse_column_definition(index: usize, entry: &Value) -> CalcResult<ColumnDefinition> {
    let name = required_field(entry, "name", index)?;
    let column_type: ColumnType = required_field(entry, "type", index)?.parse()?;

    let mut definition = ColumnDefinition::new(name, column_type)?;

    match entry.get("required") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(required)) => definition.required = *required,
        Some(_) => {
            return Err(CalcError::Config(format!(
                "Column '{}': 'required' must be true or false",
                name
            )))
        }
    }

    definition.format = optional_scalar(entry.get("format"));
    definition.default = optional_scalar(entry.get("default"));
    definition.description = optional_scalar(entry.get("description")).unwrap_or_default();

    Ok(definition)
}

fn required_field<'a>(entry: &'a Value, key: &str, index: usize) -> CalcResult<&'a str> {
    entry.get(key).and_then(Value::as_str).ok_or_else(|| {
        CalcError::Config(format!(
            "Missing required field '{}' in column definition #{}",
            key,
            index + 1
        ))
    })
}

/// Render a YAML scalar as text; mappings, sequences and null give `None`
fn optional_scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
