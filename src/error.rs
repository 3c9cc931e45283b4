use thiserror::Error;

pub type CalcResult<T> = Result<T, CalcError>;

#[derive(Error, Debug)]
pub enum CalcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Unknown column or computed value: {0}")]
    UnknownReference(String),

    #[error("Column does not exist: {0}")]
    UnknownColumn(String),

    #[error("Malformed aggregation formula: {0}")]
    MalformedAggregation(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported aggregate function: {0}")]
    UnsupportedFunction(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Failed to apply formula '{formula}': {source}")]
    Formula {
        formula: String,
        #[source]
        source: Box<CalcError>,
    },

    #[error("Failed to apply calculation rule '{rule}': {source}")]
    Rule {
        rule: String,
        #[source]
        source: Box<CalcError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CalcError {
    /// Wrap an evaluation failure with the formula text that produced it.
    pub fn in_formula(formula: &str, source: CalcError) -> Self {
        CalcError::Formula {
            formula: formula.to_string(),
            source: Box::new(source),
        }
    }

    /// Wrap a sequencing failure with the name of the rule being applied.
    pub fn in_rule(rule: &str, source: CalcError) -> Self {
        CalcError::Rule {
            rule: rule.to_string(),
            source: Box::new(source),
        }
    }

    /// Innermost error, skipping formula/rule context wrappers.
    pub fn root_cause(&self) -> &CalcError {
        match self {
            CalcError::Formula { source, .. } | CalcError::Rule { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}
