//! Formula engine: validation, single-rule application and rule sequencing
//!
//! A rule is either an aggregate (`FUNC(column)`, optionally grouped) or an
//! arithmetic expression over columns, literals and earlier results. Rules are
//! applied in order; every result is recorded under the rule name so later
//! rules can reference it, and row-aligned results also become table columns.

pub mod aggregation;
pub mod evaluator;
pub mod parser;
pub mod tokenizer;

use crate::core::rule::CalculationRule;
use crate::error::{CalcError, CalcResult};
use crate::types::{Column, ColumnValue, Table};
use aggregation::{AggregateFunction, AggregationExecutor, ReducedSeries};
use evaluator::{EvalContext, OperatorTable};
use tracing::{debug, info};

/// Result of applying one rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutput {
    /// One value per table row, in row order
    RowAligned(Vec<f64>),
    /// Collapsed to one value, or one per group
    Reduced(ReducedSeries),
}

impl RuleOutput {
    pub fn len(&self) -> usize {
        match self {
            RuleOutput::RowAligned(values) => values.len(),
            RuleOutput::Reduced(series) => series.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_row_aligned(&self) -> Option<&[f64]> {
        match self {
            RuleOutput::RowAligned(values) => Some(values),
            RuleOutput::Reduced(_) => None,
        }
    }

    pub fn as_reduced(&self) -> Option<&ReducedSeries> {
        match self {
            RuleOutput::Reduced(series) => Some(series),
            RuleOutput::RowAligned(_) => None,
        }
    }
}

/// Results computed so far in one run, keyed by rule name, in rule order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputedColumns {
    entries: Vec<(String, RuleOutput)>,
}

impl ComputedColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result; a repeated name replaces the earlier entry
    pub fn insert(&mut self, name: impl Into<String>, output: RuleOutput) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = output,
            None => self.entries.push((name, output)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RuleOutput> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, output)| output)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RuleOutput)> {
        self.entries.iter().map(|(n, output)| (n.as_str(), output))
    }

    /// Aggregate results, which never become table columns
    pub fn reduced(&self) -> impl Iterator<Item = (&str, &ReducedSeries)> {
        self.iter()
            .filter_map(|(n, output)| output.as_reduced().map(|series| (n, series)))
    }
}

/// Outcome of applying a rule list
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Input columns plus one column per row-aligned rule
    pub table: Table,
    /// Every rule's result, including aggregates
    pub computed: ComputedColumns,
}

/// Restricted-formula calculation engine
#[derive(Debug, Clone)]
pub struct CalculationEngine {
    operators: OperatorTable,
    aggregations: AggregationExecutor,
}

impl CalculationEngine {
    pub fn new() -> CalcResult<Self> {
        Ok(Self {
            operators: OperatorTable::standard(),
            aggregations: AggregationExecutor::new()?,
        })
    }

    /// Cheap check for `FUNC(` anywhere in the formula
    pub fn is_aggregation_formula(&self, formula: &str) -> bool {
        aggregation::is_aggregation(formula)
    }

    /// Strictly parse `FUNC(column)`
    pub fn parse_aggregation_formula(
        &self,
        formula: &str,
    ) -> CalcResult<(AggregateFunction, String)> {
        self.aggregations.parser().parse(formula)
    }

    /// Whether the formula belongs to the formula language.
    ///
    /// Names are not resolved here; a formula referencing a column that does
    /// not exist still validates.
    pub fn validate_formula(&self, formula: &str) -> bool {
        if self.is_aggregation_formula(formula) {
            return self.aggregations.parser().is_valid(formula);
        }
        match parser::parse_formula(formula) {
            Ok(_) => true,
            Err(e) => {
                debug!(formula, error = %e, "formula rejected");
                false
            }
        }
    }

    /// Apply a single rule, resolving names against `computed` then `table`
    pub fn apply_formula(
        &self,
        table: &Table,
        rule: &CalculationRule,
        computed: &ComputedColumns,
    ) -> CalcResult<RuleOutput> {
        table.validate_lengths()?;
        self.compute(table, rule, computed)
            .map_err(|e| CalcError::in_rule(rule.name(), e))
    }

    /// Evaluate an arithmetic formula to one value per table row.
    ///
    /// A formula without any column reference yields a constant column.
    pub fn apply_arithmetic_formula(
        &self,
        table: &Table,
        formula: &str,
        computed: &ComputedColumns,
    ) -> CalcResult<Vec<f64>> {
        let evaluate = || -> CalcResult<Vec<f64>> {
            let ast = parser::parse_formula(formula).map_err(|e| CalcError::Syntax(e.to_string()))?;
            let ctx = EvalContext::new(table, computed, &self.operators);
            let value = evaluator::evaluate(&ast, &ctx)?;
            Ok(value.into_column(table.row_count()))
        };
        evaluate().map_err(|e| CalcError::in_formula(formula, e))
    }

    /// Apply rules in order and return the extended table
    pub fn apply_multiple_rules(
        &self,
        table: &Table,
        rules: &[CalculationRule],
    ) -> CalcResult<Table> {
        self.apply_all(table, rules).map(|evaluation| evaluation.table)
    }

    /// Apply rules in order, keeping every result.
    ///
    /// The input table is not modified. The first failing rule aborts the run
    /// and is reported by name.
    pub fn apply_all(&self, table: &Table, rules: &[CalculationRule]) -> CalcResult<Evaluation> {
        table.validate_lengths()?;
        let mut working = table.clone();
        let mut computed = ComputedColumns::new();

        for rule in rules {
            let output = self
                .compute(&working, rule, &computed)
                .map_err(|e| CalcError::in_rule(rule.name(), e))?;

            if let RuleOutput::RowAligned(values) = &output {
                if values.len() == working.row_count() {
                    working.add_column(Column::new(
                        rule.name(),
                        ColumnValue::Number(values.clone()),
                    ));
                }
            }
            debug!(rule = rule.name(), entries = output.len(), "rule applied");
            computed.insert(rule.name(), output);
        }

        info!(
            rules = rules.len(),
            rows = working.row_count(),
            "calculation rules applied"
        );
        Ok(Evaluation {
            table: working,
            computed,
        })
    }

    fn compute(
        &self,
        table: &Table,
        rule: &CalculationRule,
        computed: &ComputedColumns,
    ) -> CalcResult<RuleOutput> {
        if self.is_aggregation_formula(rule.formula()) {
            let series = self
                .aggregations
                .execute(table, rule)
                .map_err(|e| CalcError::in_formula(rule.formula(), e))?;
            Ok(RuleOutput::Reduced(series))
        } else {
            self.apply_arithmetic_formula(table, rule.formula(), computed)
                .map(RuleOutput::RowAligned)
        }
    }
}

#[cfg(test)]
mod tests;
