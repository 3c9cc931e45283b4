//! teamcalc - per-team calculation rules over tabular data
//!
//! Teams describe their data (a CSV source and its column types) and an
//! ordered list of calculation rules in YAML. Rules are written in a small
//! formula language: arithmetic over columns and numeric literals, or a
//! single aggregate such as `SUM(revenue)`, optionally grouped by columns or
//! by calendar month of a date column. Arbitrary code never runs.
//!
//! # Example
//!
//! ```
//! use teamcalc::core::{CalculationEngine, CalculationRule};
//! use teamcalc::types::{Column, ColumnValue, Table};
//!
//! let table = Table::from_columns([
//!     Column::new("quantity", ColumnValue::Number(vec![10.0, 20.0])),
//!     Column::new("unit_price", ColumnValue::Number(vec![100.0, 150.0])),
//! ]);
//! let rules = vec![
//!     CalculationRule::new("gross", "quantity * unit_price")?,
//!     CalculationRule::new("total", "SUM(gross)")?,
//! ];
//!
//! let engine = CalculationEngine::new()?;
//! let evaluation = engine.apply_all(&table, &rules)?;
//! assert!(evaluation.table.contains_column("gross"));
//! assert!(!evaluation.table.contains_column("total"));
//! # Ok::<(), teamcalc::error::CalcError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{CalcError, CalcResult};
pub use types::{Column, ColumnValue, Table};
