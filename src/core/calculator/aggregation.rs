//! Aggregate formulas: `FUNC(column)` with optional grouping
//!
//! Detection is a cheap substring check; parsing is a strict whole-formula
//! match. Reductions skip missing (NaN) values.

use crate::core::rule::{CalculationRule, GroupKey, GroupTransform};
use crate::error::{CalcError, CalcResult};
use crate::types::{format_number, parse_timestamp, ColumnValue, Table};
use chrono::{Datelike, NaiveDateTime};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Reducing functions available in aggregate formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    Std,
    Var,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 7] = [
        AggregateFunction::Sum,
        AggregateFunction::Mean,
        AggregateFunction::Count,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Std,
        AggregateFunction::Var,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Mean => "MEAN",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Std => "STD",
            AggregateFunction::Var => "VAR",
        }
    }

    /// Case-insensitive lookup
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether the formula looks like an aggregate call.
///
/// True when the upper-cased text contains `FUNC(` anywhere. This is a
/// substring check, not a parse: `SUM_total * 2` is not an aggregate, and
/// neither is `SUM (x)` because the name is not directly followed by `(`.
pub fn is_aggregation(formula: &str) -> bool {
    let upper = formula.to_uppercase();
    AggregateFunction::ALL
        .iter()
        .any(|f| upper.contains(&format!("{}(", f.name())))
}

//==============================================================================
// Strict parsing
//==============================================================================

/// Strict `FUNC(identifier)` matcher
#[derive(Debug, Clone)]
pub struct AggregationParser {
    pattern: Regex,
}

impl AggregationParser {
    pub fn new() -> CalcResult<Self> {
        let names: Vec<&str> = AggregateFunction::ALL.iter().map(|f| f.name()).collect();
        let source = format!(r"^(?i:({}))\(([A-Za-z_][A-Za-z0-9_]*)\)$", names.join("|"));
        let pattern = Regex::new(&source)
            .map_err(|e| CalcError::Syntax(format!("Regex error: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Extract function and column; whitespace anywhere is ignored
    pub fn parse(&self, formula: &str) -> CalcResult<(AggregateFunction, String)> {
        let cleaned: String = formula.chars().filter(|c| !c.is_whitespace()).collect();
        let malformed = || CalcError::MalformedAggregation(formula.to_string());

        let caps = self.pattern.captures(&cleaned).ok_or_else(malformed)?;
        let func_name = caps.get(1).ok_or_else(malformed)?.as_str();
        let column = caps.get(2).ok_or_else(malformed)?.as_str();
        let func = AggregateFunction::from_name(func_name)
            .ok_or_else(|| CalcError::UnsupportedFunction(func_name.to_uppercase()))?;

        Ok((func, column.to_string()))
    }

    pub fn is_valid(&self, formula: &str) -> bool {
        self.parse(formula).is_ok()
    }
}

//==============================================================================
// Reducers
//==============================================================================

pub type Reducer = fn(&[f64]) -> f64;

fn present(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

fn reduce_sum(values: &[f64]) -> f64 {
    present(values).sum()
}

fn reduce_count(values: &[f64]) -> f64 {
    present(values).count() as f64
}

fn reduce_mean(values: &[f64]) -> f64 {
    let n = reduce_count(values);
    if n == 0.0 {
        return f64::NAN;
    }
    reduce_sum(values) / n
}

fn reduce_min(values: &[f64]) -> f64 {
    present(values).reduce(f64::min).unwrap_or(f64::NAN)
}

fn reduce_max(values: &[f64]) -> f64 {
    present(values).reduce(f64::max).unwrap_or(f64::NAN)
}

/// Sample variance (n - 1 denominator)
fn reduce_var(values: &[f64]) -> f64 {
    let n = reduce_count(values);
    if n < 2.0 {
        return f64::NAN;
    }
    let mean = reduce_mean(values);
    present(values).map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

fn reduce_std(values: &[f64]) -> f64 {
    reduce_var(values).sqrt()
}

/// Aggregate function -> implementation mapping
#[derive(Debug, Clone)]
pub struct ReducerTable {
    reducers: HashMap<AggregateFunction, Reducer>,
}

impl ReducerTable {
    pub fn standard() -> Self {
        let mut reducers: HashMap<AggregateFunction, Reducer> = HashMap::new();
        reducers.insert(AggregateFunction::Sum, reduce_sum);
        reducers.insert(AggregateFunction::Mean, reduce_mean);
        reducers.insert(AggregateFunction::Count, reduce_count);
        reducers.insert(AggregateFunction::Min, reduce_min);
        reducers.insert(AggregateFunction::Max, reduce_max);
        reducers.insert(AggregateFunction::Std, reduce_std);
        reducers.insert(AggregateFunction::Var, reduce_var);
        Self { reducers }
    }

    pub fn get(&self, func: AggregateFunction) -> CalcResult<Reducer> {
        self.reducers
            .get(&func)
            .copied()
            .ok_or_else(|| CalcError::UnsupportedFunction(func.name().to_string()))
    }
}

impl Default for ReducerTable {
    fn default() -> Self {
        Self::standard()
    }
}

//==============================================================================
// Group keys and reduced series
//==============================================================================

/// One component of a group key
#[derive(Debug, Clone)]
pub enum KeyPart {
    Number(f64),
    Text(String),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Month { year: i32, month: u32 },
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Number(_) => 0,
            KeyPart::Text(_) => 1,
            KeyPart::Boolean(_) => 2,
            KeyPart::Timestamp(_) => 3,
            KeyPart::Month { .. } => 4,
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Number(a), KeyPart::Number(b)) => a.total_cmp(b),
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
            (KeyPart::Boolean(a), KeyPart::Boolean(b)) => a.cmp(b),
            (KeyPart::Timestamp(a), KeyPart::Timestamp(b)) => a.cmp(b),
            (
                KeyPart::Month { year: ya, month: ma },
                KeyPart::Month { year: yb, month: mb },
            ) => (ya, ma).cmp(&(yb, mb)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Number(n) => f.write_str(&format_number(*n)),
            KeyPart::Text(s) => f.write_str(s),
            KeyPart::Boolean(b) => write!(f, "{}", b),
            KeyPart::Timestamp(ts) => write!(f, "{}", ts),
            KeyPart::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
        }
    }
}

/// Result of an aggregate rule: one entry, or one entry per group in
/// ascending key order
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedSeries {
    /// Names of the key columns (empty for an ungrouped aggregate)
    pub index: Vec<String>,
    entries: Vec<(Vec<KeyPart>, f64)>,
}

impl ReducedSeries {
    /// Single-entry series keyed by a label such as `SUM(revenue)`
    pub fn single(label: impl Into<String>, value: f64) -> Self {
        Self {
            index: Vec::new(),
            entries: vec![(vec![KeyPart::Text(label.into())], value)],
        }
    }

    pub fn grouped(index: Vec<String>, entries: Vec<(Vec<KeyPart>, f64)>) -> Self {
        Self { index, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Vec<KeyPart>, f64)] {
        &self.entries
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    /// Display labels, multi-part keys joined with ", "
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key_label(key)).collect()
    }

    /// Value for the entry whose label matches
    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(key, _)| key_label(key) == label)
            .map(|(_, v)| *v)
    }

    /// The only value, when there is exactly one entry
    pub fn as_scalar(&self) -> Option<f64> {
        match self.entries.as_slice() {
            [(_, v)] => Some(*v),
            _ => None,
        }
    }
}

fn key_label(key: &[KeyPart]) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

//==============================================================================
// Execution
//==============================================================================

/// Runs aggregate rules against a table
#[derive(Debug, Clone)]
pub struct AggregationExecutor {
    parser: AggregationParser,
    reducers: ReducerTable,
}

impl AggregationExecutor {
    pub fn new() -> CalcResult<Self> {
        Ok(Self {
            parser: AggregationParser::new()?,
            reducers: ReducerTable::standard(),
        })
    }

    pub fn parser(&self) -> &AggregationParser {
        &self.parser
    }

    pub fn execute(&self, table: &Table, rule: &CalculationRule) -> CalcResult<ReducedSeries> {
        let (func, column_name) = self.parser.parse(rule.formula())?;
        let column = table
            .column(&column_name)
            .ok_or_else(|| CalcError::UnknownColumn(column_name.clone()))?;
        let values = reduction_input(func, &column.values, &column_name)?;
        let reducer = self.reducers.get(func)?;

        if rule.group_by().is_empty() {
            let value = reducer(&values);
            debug!(rule = rule.name(), %func, column = %column_name, value, "aggregated");
            return Ok(ReducedSeries::single(
                format!("{}({})", func, column_name),
                value,
            ));
        }

        let key_columns = rule
            .group_by()
            .iter()
            .map(|key| key_column(table, key))
            .collect::<CalcResult<Vec<Vec<Option<KeyPart>>>>>()?;
        for (key, parts) in rule.group_by().iter().zip(&key_columns) {
            if parts.len() != values.len() {
                return Err(CalcError::Type(format!(
                    "group column '{}' has {} rows but '{}' has {}",
                    key.column,
                    parts.len(),
                    column_name,
                    values.len()
                )));
            }
        }

        let mut groups: BTreeMap<Vec<KeyPart>, Vec<f64>> = BTreeMap::new();
        'rows: for (row, value) in values.iter().enumerate() {
            let mut key = Vec::with_capacity(key_columns.len());
            for parts in &key_columns {
                match parts.get(row).and_then(Option::as_ref) {
                    Some(part) => key.push(part.clone()),
                    // Rows with a missing key belong to no group
                    None => continue 'rows,
                }
            }
            groups.entry(key).or_default().push(*value);
        }

        let entries: Vec<(Vec<KeyPart>, f64)> = groups
            .into_iter()
            .map(|(key, group_values)| (key, reducer(&group_values)))
            .collect();
        debug!(
            rule = rule.name(),
            %func,
            column = %column_name,
            groups = entries.len(),
            "aggregated by group"
        );

        let index = rule.group_by().iter().map(GroupKey::key_name).collect();
        Ok(ReducedSeries::grouped(index, entries))
    }
}

/// Numeric input for a reduction. COUNT accepts any column kind and only
/// looks at which cells are present.
fn reduction_input(
    func: AggregateFunction,
    values: &ColumnValue,
    name: &str,
) -> CalcResult<Vec<f64>> {
    match (func, values) {
        (AggregateFunction::Count, ColumnValue::Text(_) | ColumnValue::Date(_)) => {
            let presence = (0..values.len())
                .map(|row| if values.is_missing(row) { f64::NAN } else { 1.0 })
                .collect();
            Ok(presence)
        }
        _ => values.to_numbers(name),
    }
}

/// Per-row key parts for one grouping key (None = missing)
fn key_column(table: &Table, key: &GroupKey) -> CalcResult<Vec<Option<KeyPart>>> {
    let column = table
        .column(&key.column)
        .ok_or_else(|| CalcError::UnknownColumn(key.column.clone()))?;

    match key.transform {
        None => Ok(raw_key_parts(&column.values)),
        Some(GroupTransform::Month) => month_key_parts(&column.values, &key.column),
    }
}

fn raw_key_parts(values: &ColumnValue) -> Vec<Option<KeyPart>> {
    match values {
        ColumnValue::Number(v) => v
            .iter()
            // -0.0 and 0.0 share a group
            .map(|n| (!n.is_nan()).then_some(KeyPart::Number(if *n == 0.0 { 0.0 } else { *n })))
            .collect(),
        ColumnValue::Text(v) => v.iter().map(|s| s.clone().map(KeyPart::Text)).collect(),
        ColumnValue::Boolean(v) => v.iter().map(|b| Some(KeyPart::Boolean(*b))).collect(),
        ColumnValue::Date(v) => v.iter().map(|ts| ts.map(KeyPart::Timestamp)).collect(),
    }
}

fn month_of(ts: NaiveDateTime) -> KeyPart {
    KeyPart::Month {
        year: ts.year(),
        month: ts.month(),
    }
}

/// Year-month bucket of a date column; text columns are parsed as dates
fn month_key_parts(values: &ColumnValue, name: &str) -> CalcResult<Vec<Option<KeyPart>>> {
    match values {
        ColumnValue::Date(v) => Ok(v.iter().map(|ts| ts.map(month_of)).collect()),
        ColumnValue::Text(v) => v
            .iter()
            .map(|cell| match cell {
                None => Ok(None),
                Some(text) => parse_timestamp(text, None)
                    .map(|ts| Some(month_of(ts)))
                    .ok_or_else(|| {
                        CalcError::Type(format!(
                            "cannot read '{}' in column '{}' as a date",
                            text, name
                        ))
                    }),
            })
            .collect(),
        other => Err(CalcError::Type(format!(
            "column '{}' is {}, month grouping needs dates",
            name,
            other.type_name()
        ))),
    }
}
