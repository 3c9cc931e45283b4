//! Calculation rules: a named formula plus optional grouping keys

use crate::error::{CalcError, CalcResult};
use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;

/// Derived bucket applied to a grouping column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTransform {
    /// Year-month of a date column
    Month,
}

impl GroupTransform {
    pub fn name(self) -> &'static str {
        match self {
            GroupTransform::Month => "month",
        }
    }
}

/// A grouping key: `column` or `column::month`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    pub column: String,
    pub transform: Option<GroupTransform>,
}

impl GroupKey {
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            column: name.into(),
            transform: None,
        }
    }

    pub fn month(name: impl Into<String>) -> Self {
        Self {
            column: name.into(),
            transform: Some(GroupTransform::Month),
        }
    }

    /// Name of the key column the grouping produces (`date::month` -> `date_month`)
    pub fn key_name(&self) -> String {
        match self.transform {
            Some(t) => format!("{}_{}", self.column, t.name()),
            None => self.column.clone(),
        }
    }
}

impl FromStr for GroupKey {
    type Err = CalcError;

    fn from_str(spec: &str) -> CalcResult<Self> {
        let spec = spec.trim();
        let (column, transform) = match spec.split_once("::") {
            Some((column, "month")) => (column, Some(GroupTransform::Month)),
            Some((_, other)) => {
                return Err(CalcError::Config(format!(
                    "Unsupported grouping transform '{}' in '{}' (supported: month)",
                    other, spec
                )))
            }
            None => (spec, None),
        };
        if column.is_empty() {
            return Err(CalcError::Config(format!(
                "Grouping key '{}' has no column name",
                spec
            )));
        }
        Ok(Self {
            column: column.to_string(),
            transform,
        })
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transform {
            Some(t) => write!(f, "{}::{}", self.column, t.name()),
            None => write!(f, "{}", self.column),
        }
    }
}

/// A named formula applied against a table to produce one named result
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationRule {
    name: String,
    formula: String,
    description: String,
    group_by: Vec<GroupKey>,
}

impl CalculationRule {
    /// Create an ungrouped rule; name and formula must be non-blank
    pub fn new(name: impl Into<String>, formula: impl Into<String>) -> CalcResult<Self> {
        let name = name.into();
        let formula = formula.into();
        if name.trim().is_empty() {
            return Err(CalcError::Validation(
                "Calculation rule name is required".to_string(),
            ));
        }
        if formula.trim().is_empty() {
            return Err(CalcError::Validation(format!(
                "Calculation rule '{}' has an empty formula",
                name
            )));
        }
        Ok(Self {
            name,
            formula,
            description: String::new(),
            group_by: Vec::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<GroupKey>) -> Self {
        self.group_by = group_by;
        self
    }

    /// Parse `column` / `column::month` specifiers and group by them
    pub fn grouped_by<S: AsRef<str>>(self, specs: &[S]) -> CalcResult<Self> {
        let keys = specs
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<CalcResult<Vec<GroupKey>>>()?;
        Ok(self.with_group_by(keys))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn group_by(&self) -> &[GroupKey] {
        &self.group_by
    }
}

/// Build rules from a decoded `calculation_rules` list.
///
/// Each entry needs `name` and `formula`; `description` and `group_by` are
/// optional. The first missing required key is reported with its position.
pub fn parse_calculation_rules(rules: &Value) -> CalcResult<Vec<CalculationRule>> {
    let entries = match rules {
        Value::Sequence(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(CalcError::Config(
                "'calculation_rules' must be a list".to_string(),
            ))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_rule(index, entry))
        .collect()
}

fn parse_rule(index: usize, entry: &Value) -> CalcResult<CalculationRule> {
    if !entry.is_mapping() {
        return Err(CalcError::Config(format!(
            "Calculation rule #{} must be a mapping",
            index + 1
        )));
    }

    let name = required_str(entry, "name", index)?;
    let formula = required_str(entry, "formula", index)?;

    let description = match entry.get("description") {
        None | Some(Value::Null) => String::new(),
        Some(v) => v
            .as_str()
            .ok_or_else(|| {
                CalcError::Config(format!(
                    "Calculation rule '{}': 'description' must be a string",
                    name
                ))
            })?
            .to_string(),
    };

    let group_by = match entry.get("group_by") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(specs)) => specs
            .iter()
            .map(|spec| {
                spec.as_str()
                    .ok_or_else(|| {
                        CalcError::Config(format!(
                            "Calculation rule '{}': group_by entries must be strings",
                            name
                        ))
                    })
                    .and_then(str::parse)
            })
            .collect::<CalcResult<Vec<GroupKey>>>()?,
        Some(_) => {
            return Err(CalcError::Config(format!(
                "Calculation rule '{}': 'group_by' must be a list",
                name
            )))
        }
    };

    Ok(CalculationRule::new(name, formula)?
        .with_description(description)
        .with_group_by(group_by))
}

fn required_str<'a>(entry: &'a Value, key: &str, index: usize) -> CalcResult<&'a str> {
    match entry.get(key) {
        None | Some(Value::Null) => Err(CalcError::Config(format!(
            "Missing required field '{}' in calculation rule #{}",
            key,
            index + 1
        ))),
        Some(v) => v.as_str().ok_or_else(|| {
            CalcError::Config(format!(
                "Field '{}' in calculation rule #{} must be a string",
                key,
                index + 1
            ))
        }),
    }
}
