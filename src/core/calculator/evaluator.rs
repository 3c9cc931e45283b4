//! Formula evaluator
//!
//! Walks a parsed [`Expr`] against a table. Values are either a scalar or a
//! full column; operators broadcast the way array libraries do (scalar with
//! column applies elementwise). Division follows IEEE-754, so `x / 0` is
//! `±inf` and `0 / 0` is `NaN` rather than an error.

use super::parser::{BinaryOp, Expr, UnaryOp};
use super::{ComputedColumns, RuleOutput};
use crate::error::{CalcError, CalcResult};
use crate::types::Table;
use std::collections::HashMap;

/// Value produced while walking an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(f64),
    Column(Vec<f64>),
}

impl Operand {
    /// Materialize as a column of `len` rows, repeating scalars
    pub fn into_column(self, len: usize) -> Vec<f64> {
        match self {
            Operand::Scalar(n) => vec![n; len],
            Operand::Column(values) => values,
        }
    }
}

pub type BinaryKernel = fn(f64, f64) -> f64;
pub type UnaryKernel = fn(f64) -> f64;

/// Operator -> implementation mapping, built once per engine
#[derive(Debug, Clone)]
pub struct OperatorTable {
    binary: HashMap<BinaryOp, BinaryKernel>,
    unary: HashMap<UnaryOp, UnaryKernel>,
}

impl OperatorTable {
    /// The arithmetic operators the formula language admits
    pub fn standard() -> Self {
        let mut binary: HashMap<BinaryOp, BinaryKernel> = HashMap::new();
        binary.insert(BinaryOp::Add, |a, b| a + b);
        binary.insert(BinaryOp::Sub, |a, b| a - b);
        binary.insert(BinaryOp::Mul, |a, b| a * b);
        binary.insert(BinaryOp::Div, |a, b| a / b);
        binary.insert(BinaryOp::Mod, floored_mod);
        binary.insert(BinaryOp::Pow, f64::powf);

        let mut unary: HashMap<UnaryOp, UnaryKernel> = HashMap::new();
        unary.insert(UnaryOp::Neg, |a| -a);
        unary.insert(UnaryOp::Pos, |a| a);

        Self { binary, unary }
    }

    pub fn binary(&self, op: BinaryOp) -> CalcResult<BinaryKernel> {
        self.binary
            .get(&op)
            .copied()
            .ok_or_else(|| CalcError::UnsupportedOperator(op.symbol().to_string()))
    }

    pub fn unary(&self, op: UnaryOp) -> CalcResult<UnaryKernel> {
        self.unary
            .get(&op)
            .copied()
            .ok_or_else(|| CalcError::UnsupportedOperator(format!("unary {}", op.symbol())))
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Modulo whose result takes the sign of the divisor
fn floored_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Evaluation context: the table, the results computed so far this run, and
/// the operator table
pub struct EvalContext<'a> {
    pub table: &'a Table,
    pub computed: &'a ComputedColumns,
    pub operators: &'a OperatorTable,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        table: &'a Table,
        computed: &'a ComputedColumns,
        operators: &'a OperatorTable,
    ) -> Self {
        Self {
            table,
            computed,
            operators,
        }
    }

    /// Resolve a name: computed results shadow table columns
    pub fn resolve(&self, name: &str) -> CalcResult<Operand> {
        if let Some(output) = self.computed.get(name) {
            return match output {
                RuleOutput::RowAligned(values) => Ok(Operand::Column(values.clone())),
                RuleOutput::Reduced(series) => series.as_scalar().map(Operand::Scalar).ok_or_else(|| {
                    CalcError::Type(format!(
                        "'{}' is a grouped aggregate with {} entries and cannot be used in row-wise arithmetic",
                        name,
                        series.len()
                    ))
                }),
            };
        }

        if let Some(column) = self.table.column(name) {
            return column.values.to_numbers(name).map(Operand::Column);
        }

        Err(CalcError::UnknownReference(name.to_string()))
    }
}

/// Evaluate an expression in the given context
pub fn evaluate(expr: &Expr, ctx: &EvalContext) -> CalcResult<Operand> {
    match expr {
        Expr::Number(n) => Ok(Operand::Scalar(*n)),

        Expr::Identifier(name) => ctx.resolve(name),

        Expr::BinaryOp { op, left, right } => {
            let left_val = evaluate(left, ctx)?;
            let right_val = evaluate(right, ctx)?;
            let kernel = ctx.operators.binary(*op)?;
            broadcast_binary(kernel, left_val, right_val)
        }

        Expr::UnaryOp { op, operand } => {
            let kernel = ctx.operators.unary(*op)?;
            Ok(match evaluate(operand, ctx)? {
                Operand::Scalar(n) => Operand::Scalar(kernel(n)),
                Operand::Column(values) => {
                    Operand::Column(values.into_iter().map(kernel).collect())
                }
            })
        }
    }
}

/// Apply a binary kernel with scalar/column broadcasting
fn broadcast_binary(kernel: BinaryKernel, left: Operand, right: Operand) -> CalcResult<Operand> {
    Ok(match (left, right) {
        (Operand::Scalar(l), Operand::Scalar(r)) => Operand::Scalar(kernel(l, r)),
        (Operand::Scalar(l), Operand::Column(r)) => {
            Operand::Column(r.into_iter().map(|r| kernel(l, r)).collect())
        }
        (Operand::Column(l), Operand::Scalar(r)) => {
            Operand::Column(l.into_iter().map(|l| kernel(l, r)).collect())
        }
        (Operand::Column(l), Operand::Column(r)) => {
            if l.len() != r.len() {
                return Err(CalcError::Type(format!(
                    "cannot combine columns of length {} and {}",
                    l.len(),
                    r.len()
                )));
            }
            Operand::Column(l.into_iter().zip(r).map(|(l, r)| kernel(l, r)).collect())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calculator::aggregation::ReducedSeries;
    use crate::core::calculator::parser::parse_formula;
    use crate::types::{Column, ColumnValue};

    fn sample_table() -> Table {
        Table::from_columns([
            Column::new("quantity", ColumnValue::Number(vec![10.0, 20.0, 15.0])),
            Column::new("unit_price", ColumnValue::Number(vec![100.0, 150.0, 200.0])),
            Column::new("region", ColumnValue::text(&["North", "South", "North"])),
        ])
    }

    fn eval(formula: &str, table: &Table, computed: &ComputedColumns) -> CalcResult<Operand> {
        let ast = parse_formula(formula).map_err(|e| CalcError::Syntax(e.to_string()))?;
        let operators = OperatorTable::standard();
        let ctx = EvalContext::new(table, computed, &operators);
        evaluate(&ast, &ctx)
    }

    #[test]
    fn test_eval_scalar_arithmetic() {
        let table = Table::new();
        let computed = ComputedColumns::new();
        assert_eq!(eval("2 + 3 * 4", &table, &computed).unwrap(), Operand::Scalar(14.0));
        assert_eq!(eval("(2 + 3) * 4", &table, &computed).unwrap(), Operand::Scalar(20.0));
        assert_eq!(eval("2 ** 3", &table, &computed).unwrap(), Operand::Scalar(8.0));
        assert_eq!(eval("-2 ** 2", &table, &computed).unwrap(), Operand::Scalar(-4.0));
        assert_eq!(eval("7 % 3", &table, &computed).unwrap(), Operand::Scalar(1.0));
    }

    #[test]
    fn test_floored_mod_takes_divisor_sign() {
        assert_eq!(floored_mod(-7.0, 3.0), 2.0);
        assert_eq!(floored_mod(7.0, -3.0), -2.0);
        assert!(floored_mod(1.0, 0.0).is_nan());
    }

    #[test]
    fn test_eval_broadcasts_columns() {
        let table = sample_table();
        let computed = ComputedColumns::new();
        assert_eq!(
            eval("quantity * unit_price", &table, &computed).unwrap(),
            Operand::Column(vec![1000.0, 3000.0, 3000.0])
        );
        assert_eq!(
            eval("quantity + 1", &table, &computed).unwrap(),
            Operand::Column(vec![11.0, 21.0, 16.0])
        );
        assert_eq!(
            eval("-quantity", &table, &computed).unwrap(),
            Operand::Column(vec![-10.0, -20.0, -15.0])
        );
    }

    #[test]
    fn test_division_by_zero_is_infinite() {
        let table = Table::from_columns([
            Column::new("a", ColumnValue::Number(vec![1.0, -1.0, 0.0])),
        ]);
        let computed = ComputedColumns::new();
        match eval("a / 0", &table, &computed).unwrap() {
            Operand::Column(v) => {
                assert_eq!(v[0], f64::INFINITY);
                assert_eq!(v[1], f64::NEG_INFINITY);
                assert!(v[2].is_nan());
            }
            other => panic!("Expected column, got {:?}", other),
        }
    }

    #[test]
    fn test_computed_shadows_table_column() {
        let table = sample_table();
        let mut computed = ComputedColumns::new();
        computed.insert(
            "quantity",
            RuleOutput::RowAligned(vec![1.0, 1.0, 1.0]),
        );
        assert_eq!(
            eval("quantity * 2", &table, &computed).unwrap(),
            Operand::Column(vec![2.0, 2.0, 2.0])
        );
    }

    #[test]
    fn test_single_entry_aggregate_acts_as_scalar() {
        let table = sample_table();
        let mut computed = ComputedColumns::new();
        computed.insert(
            "total",
            RuleOutput::Reduced(ReducedSeries::single("SUM(quantity)", 45.0)),
        );
        assert_eq!(
            eval("quantity / total * 100", &table, &computed).unwrap(),
            Operand::Column(vec![10.0 / 45.0 * 100.0, 20.0 / 45.0 * 100.0, 15.0 / 45.0 * 100.0])
        );
    }

    #[test]
    fn test_unknown_reference_names_identifier() {
        let table = sample_table();
        let computed = ComputedColumns::new();
        let err = eval("nonexistent_column * 2", &table, &computed).unwrap_err();
        assert!(matches!(err, CalcError::UnknownReference(ref n) if n == "nonexistent_column"));
    }

    #[test]
    fn test_text_column_is_not_numeric() {
        let table = sample_table();
        let computed = ComputedColumns::new();
        let err = eval("region * 2", &table, &computed).unwrap_err();
        assert!(matches!(err, CalcError::Type(_)));
    }

    #[test]
    fn test_into_column_broadcasts_scalar() {
        assert_eq!(Operand::Scalar(5.0).into_column(3), vec![5.0, 5.0, 5.0]);
    }
}
