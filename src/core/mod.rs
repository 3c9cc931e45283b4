//! Core domain: formula engine, calculation rules, data formats and teams

pub mod calculator;
pub mod data_format;
pub mod rule;
pub mod team;

pub use calculator::{CalculationEngine, ComputedColumns, Evaluation, RuleOutput};
pub use data_format::{ColumnDefinition, ColumnType, DataFormat, DataValidator};
pub use rule::{CalculationRule, GroupKey};
pub use team::Team;
