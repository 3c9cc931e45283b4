use crate::error::{CalcError, CalcResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

//==============================================================================
// Column Values
//==============================================================================

/// Column value types (homogeneous arrays)
///
/// Missing cells are `NaN` for numbers and `None` for the other kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// Array of numbers (int and float columns both land here)
    Number(Vec<f64>),
    /// Array of text strings
    Text(Vec<Option<String>>),
    /// Array of timestamps (date-only values sit at midnight)
    Date(Vec<Option<NaiveDateTime>>),
    /// Array of booleans
    Boolean(Vec<bool>),
}

impl ColumnValue {
    /// Build a text column from borrowed strings, treating "" as missing
    pub fn text<S: AsRef<str>>(values: &[S]) -> Self {
        ColumnValue::Text(
            values
                .iter()
                .map(|s| {
                    let s = s.as_ref();
                    (!s.is_empty()).then(|| s.to_string())
                })
                .collect(),
        )
    }

    /// Get the length of the array
    pub fn len(&self) -> usize {
        match self {
            ColumnValue::Number(v) => v.len(),
            ColumnValue::Text(v) => v.len(),
            ColumnValue::Date(v) => v.len(),
            ColumnValue::Boolean(v) => v.len(),
        }
    }

    /// Check if array is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Number(_) => "Number",
            ColumnValue::Text(_) => "Text",
            ColumnValue::Date(_) => "Date",
            ColumnValue::Boolean(_) => "Boolean",
        }
    }

    /// Whether the cell at `row` holds no value
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            ColumnValue::Number(v) => v.get(row).map_or(true, |n| n.is_nan()),
            ColumnValue::Text(v) => v.get(row).map_or(true, Option::is_none),
            ColumnValue::Date(v) => v.get(row).map_or(true, Option::is_none),
            ColumnValue::Boolean(v) => row >= v.len(),
        }
    }

    /// Number of missing cells
    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_missing(row)).count()
    }

    /// Numeric view used by arithmetic and reductions.
    ///
    /// Booleans count as 0/1; text and dates are rejected.
    pub fn to_numbers(&self, column: &str) -> CalcResult<Vec<f64>> {
        match self {
            ColumnValue::Number(v) => Ok(v.clone()),
            ColumnValue::Boolean(v) => Ok(v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()),
            other => Err(CalcError::Type(format!(
                "column '{}' is {}, not numeric",
                column,
                other.type_name()
            ))),
        }
    }

    /// Render a single cell for display
    pub fn cell_text(&self, row: usize) -> String {
        if self.is_missing(row) {
            return String::new();
        }
        match self {
            ColumnValue::Number(v) => format_number(v[row]),
            ColumnValue::Text(v) => v[row].clone().unwrap_or_default(),
            ColumnValue::Date(v) => v[row].map(format_timestamp).unwrap_or_default(),
            ColumnValue::Boolean(v) => v[row].to_string(),
        }
    }
}

/// Format a number for display, removing unnecessary decimal places
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// Parse a date or datetime string.
///
/// With an explicit strftime `format` only that layout is tried (as a
/// datetime, then as a date). Without one, common ISO-like layouts are tried,
/// including RFC 3339 and bare `YYYY-MM`.
pub fn parse_timestamp(text: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Some(fmt) = format {
        return NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, fmt)
                    .ok()
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            });
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_local());
    }
    for layout in DATETIME_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(ts);
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(text, layout) {
            return Some(d.and_time(chrono::NaiveTime::MIN));
        }
    }
    // Year-month only, e.g. "2024-03"
    NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    if ts.time() == chrono::NaiveTime::MIN {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

//==============================================================================
// Tables
//==============================================================================

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValue,
}

impl Column {
    pub fn new(name: impl Into<String>, values: ColumnValue) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A table of equally long columns, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns; later duplicates replace earlier ones
    pub fn from_columns(columns: impl IntoIterator<Item = Column>) -> Self {
        let mut table = Self::new();
        for column in columns {
            table.add_column(column);
        }
        table
    }

    /// Insert a column, replacing a same-named column in place
    pub fn add_column(&mut self, column: Column) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Get the number of rows (length of first column, all should be same)
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Validate all columns have the same length
    pub fn validate_lengths(&self) -> CalcResult<()> {
        let row_count = self.row_count();
        for column in &self.columns {
            if column.len() != row_count {
                return Err(CalcError::Validation(format!(
                    "Column '{}' has {} rows, expected {} rows",
                    column.name,
                    column.len(),
                    row_count
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_column_replaces_in_place() {
        let mut table = Table::from_columns([
            Column::new("a", ColumnValue::Number(vec![1.0, 2.0])),
            Column::new("b", ColumnValue::Number(vec![3.0, 4.0])),
        ]);
        table.add_column(Column::new("a", ColumnValue::Number(vec![5.0, 6.0])));

        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(
            table.column("a").map(|c| c.values.clone()),
            Some(ColumnValue::Number(vec![5.0, 6.0]))
        );
    }

    #[test]
    fn test_validate_lengths_reports_column() {
        let table = Table::from_columns([
            Column::new("a", ColumnValue::Number(vec![1.0, 2.0])),
            Column::new("b", ColumnValue::Number(vec![3.0])),
        ]);
        let err = table.validate_lengths().unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_missing_values() {
        let nums = ColumnValue::Number(vec![1.0, f64::NAN, 3.0]);
        assert_eq!(nums.missing_count(), 1);
        let text = ColumnValue::text(&["x", "", "z"]);
        assert!(text.is_missing(1));
        assert_eq!(text.cell_text(2), "z");
    }

    #[test]
    fn test_boolean_column_is_numeric() {
        let flags = ColumnValue::Boolean(vec![true, false]);
        assert_eq!(flags.to_numbers("flag").unwrap(), vec![1.0, 0.0]);
        assert!(ColumnValue::text(&["a"]).to_numbers("name").is_err());
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let jan15 = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_time(chrono::NaiveTime::MIN);
        assert_eq!(parse_timestamp("2024-01-15", None), Some(jan15));
        assert_eq!(parse_timestamp("2024/01/15", None), Some(jan15));
        assert_eq!(parse_timestamp("15.01.2024", Some("%d.%m.%Y")), Some(jan15));
        assert_eq!(
            parse_timestamp("2024-03", None).map(|ts| ts.date()),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(parse_timestamp("2024-01-15 08:30:00", None).is_some());
        assert!(parse_timestamp("not a date", None).is_none());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000.0), "1000");
        assert_eq!(format_number(183.333333333), "183.333333");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }
}
