use crate::config::{ConfigLoader, TeamConfigManager, TeamSetup};
use crate::core::calculator::{CalculationEngine, Evaluation, RuleOutput};
use crate::core::data_format::DataValidator;
use crate::core::team::Team;
use crate::data::DataReader;
use crate::error::{CalcError, CalcResult};
use crate::types::{format_number, ColumnValue, Table};
use colored::Colorize;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Config directory plus the root that relative data paths resolve against
pub struct Workspace {
    pub manager: TeamConfigManager,
    pub reader: DataReader,
}

impl Workspace {
    /// `data_root` defaults to the parent of the config directory
    pub fn open(config_dir: &Path, data_root: Option<PathBuf>) -> CalcResult<Self> {
        let loader = ConfigLoader::new(config_dir)?;
        let data_root = data_root.unwrap_or_else(|| {
            config_dir
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });
        Ok(Self {
            manager: TeamConfigManager::new(loader),
            reader: DataReader::new(data_root),
        })
    }

    /// Load config and raw data for one team
    pub fn load(&self, team_id: &str) -> CalcResult<(TeamSetup, Table)> {
        let setup = self.manager.load_team_setup(team_id)?;
        let raw = self.reader.load(&setup.data_source)?;
        Ok((setup, raw))
    }
}

/// Problems with a team's data and rules; empty means ready to calculate
pub fn validation_report(
    engine: &CalculationEngine,
    setup: &TeamSetup,
    raw: &Table,
) -> Vec<String> {
    let mut problems = DataValidator::new(setup.data_format.clone()).validate_table(raw);
    for rule in &setup.rules {
        if !engine.validate_formula(rule.formula()) {
            problems.push(format!(
                "Rule '{}' has an invalid formula: {}",
                rule.name(),
                rule.formula()
            ));
        }
    }
    problems
}

/// Validate, convert and apply every rule
pub fn run_calculation(
    engine: &CalculationEngine,
    setup: &TeamSetup,
    raw: &Table,
) -> CalcResult<Evaluation> {
    let problems = validation_report(engine, setup, raw);
    if !problems.is_empty() {
        return Err(CalcError::Validation(problems.join("; ")));
    }
    let table = DataValidator::new(setup.data_format.clone()).convert_table(raw)?;
    engine.apply_all(&table, &setup.rules)
}

/// Execute the teams command
pub fn teams(config_dir: PathBuf) -> CalcResult<()> {
    let loader = ConfigLoader::new(&config_dir)?;
    let app_name = match loader.load_app_config() {
        Ok(config) => config["app"]["name"].as_str().map(str::to_string),
        Err(e) => {
            warn!(error = %e, "app config unavailable, using default name");
            None
        }
    };

    let manager = TeamConfigManager::new(loader);
    let teams = manager.load_all_teams()?;

    println!(
        "{}",
        format!("📋 {}", app_name.as_deref().unwrap_or("teamcalc"))
            .bold()
            .green()
    );
    println!("   Config: {}\n", config_dir.display());

    for (id, team) in &teams {
        if team.description().is_empty() {
            println!("   {}  {}", id.bright_blue().bold(), team.name());
        } else {
            println!(
                "   {}  {} - {}",
                id.bright_blue().bold(),
                team.name(),
                team.description().dimmed()
            );
        }
    }
    println!("\n   {} teams", teams.len());
    Ok(())
}

/// Execute the check command
pub fn check(formula: String) -> CalcResult<()> {
    let engine = CalculationEngine::new()?;
    if !engine.validate_formula(&formula) {
        println!("{}", format!("❌ Invalid formula: {}", formula).bold().red());
        return Err(CalcError::Validation(format!("Invalid formula: {}", formula)));
    }

    let kind = if engine.is_aggregation_formula(&formula) {
        let (func, column) = engine.parse_aggregation_formula(&formula)?;
        format!("aggregate {} over '{}'", func, column)
    } else {
        "arithmetic".to_string()
    };
    println!("{}", format!("✅ Valid formula ({})", kind).bold().green());
    Ok(())
}

/// Execute the validate command
pub fn validate(config_dir: PathBuf, data_root: Option<PathBuf>, team_id: String) -> CalcResult<()> {
    println!("{}", "✅ Validating team data".bold().green());
    println!("   Team: {}\n", team_id.bright_blue().bold());

    let workspace = Workspace::open(&config_dir, data_root)?;
    let (setup, raw) = workspace.load(&team_id)?;
    let engine = CalculationEngine::new()?;

    println!(
        "   {} rows, {} columns, {} rules",
        raw.row_count(),
        raw.columns().len(),
        setup.rules.len()
    );

    let problems = validation_report(&engine, &setup, &raw);
    println!();
    if problems.is_empty() {
        println!("{}", "✅ Data and rules are valid!".bold().green());
        return Ok(());
    }

    println!(
        "{}",
        format!("❌ Found {} problems", problems.len()).bold().red()
    );
    for problem in &problems {
        println!("   - {}", problem);
    }
    Err(CalcError::Validation(format!(
        "Team '{}' failed validation",
        team_id
    )))
}

/// Execute the calculate command
pub fn calculate(
    config_dir: PathBuf,
    data_root: Option<PathBuf>,
    team_id: String,
    json: bool,
) -> CalcResult<()> {
    let workspace = Workspace::open(&config_dir, data_root)?;
    let (setup, raw) = workspace.load(&team_id)?;
    let engine = CalculationEngine::new()?;
    let evaluation = run_calculation(&engine, &setup, &raw)?;

    if json {
        let document = evaluation_to_json(&setup.team, &evaluation);
        let rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| CalcError::Validation(format!("Failed to render JSON: {}", e)))?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("{}", "🧮 Calculation Results".bold().green());
    println!(
        "   Team: {} ({})\n",
        setup.team.name().bright_blue().bold(),
        setup.team.id()
    );

    for line in render_table(&evaluation.table) {
        println!("   {}", line);
    }

    let mut reduced = evaluation.computed.reduced().peekable();
    if reduced.peek().is_some() {
        println!("\n   📐 Aggregates:");
        for (name, series) in reduced {
            match series.as_scalar() {
                Some(value) if series.index.is_empty() => println!(
                    "      {} = {}",
                    name.bright_blue(),
                    format_number(value).bold()
                ),
                _ => {
                    println!(
                        "      {} (by {})",
                        name.bright_blue(),
                        series.index.join(", ")
                    );
                    for (label, value) in series.labels().iter().zip(series.values()) {
                        println!("         {}: {}", label, format_number(value).bold());
                    }
                }
            }
        }
    }
    println!();
    Ok(())
}

/// Render a table as aligned text lines, header first
pub fn render_table(table: &Table) -> Vec<String> {
    let columns = table.columns();
    let widths: Vec<usize> = columns
        .iter()
        .map(|column| {
            (0..column.len())
                .map(|row| column.values.cell_text(row).chars().count())
                .chain(std::iter::once(column.name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut lines = vec![line(columns.iter().map(|c| c.name.clone()).collect())];
    for row in 0..table.row_count() {
        lines.push(line(
            columns.iter().map(|c| c.values.cell_text(row)).collect(),
        ));
    }
    lines
}

/// JSON document for `calculate --json`; NaN and infinities become null
pub fn evaluation_to_json(team: &Team, evaluation: &Evaluation) -> JsonValue {
    let columns: Vec<JsonValue> = evaluation
        .table
        .columns()
        .iter()
        .map(|column| {
            json!({
                "name": column.name,
                "type": column.values.type_name(),
                "values": column_to_json(&column.values),
            })
        })
        .collect();

    let aggregates: Vec<JsonValue> = evaluation
        .computed
        .iter()
        .filter_map(|(name, output)| match output {
            RuleOutput::Reduced(series) => Some(json!({
                "name": name,
                "index": series.index,
                "entries": series
                    .labels()
                    .into_iter()
                    .zip(series.values())
                    .map(|(key, value)| json!({ "key": key, "value": value }))
                    .collect::<Vec<_>>(),
            })),
            RuleOutput::RowAligned(_) => None,
        })
        .collect();

    json!({
        "team": team,
        "rows": evaluation.table.row_count(),
        "columns": columns,
        "aggregates": aggregates,
    })
}

fn column_to_json(values: &ColumnValue) -> JsonValue {
    match values {
        ColumnValue::Number(nums) => nums.iter().map(|&n| JsonValue::from(n)).collect(),
        ColumnValue::Text(texts) => texts.iter().map(|t| json!(t)).collect(),
        ColumnValue::Boolean(flags) => flags.iter().map(|&b| JsonValue::from(b)).collect(),
        ColumnValue::Date(_) => (0..values.len())
            .map(|row| {
                if values.is_missing(row) {
                    JsonValue::Null
                } else {
                    JsonValue::from(values.cell_text(row))
                }
            })
            .collect(),
    }
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
