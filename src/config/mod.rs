//! YAML configuration: application settings and per-team setup
//!
//! Layout of a config directory:
//!
//! ```text
//! config/
//!   app.yaml
//!   teams/
//!     sales_a.yaml
//!     sales_b.yaml
//! ```
//!
//! Each team file holds `team`, `data_source`, `data_format` and
//! `calculation_rules` sections. The team id inside the file must match the
//! file name.

use crate::core::data_format::{parse_data_format, DataFormat};
use crate::core::rule::{parse_calculation_rules, CalculationRule};
use crate::core::team::Team;
use crate::data::DataSourceConfig;
use crate::error::{CalcError, CalcResult};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const APP_CONFIG_FILE: &str = "app.yaml";
pub const TEAMS_DIR: &str = "teams";

/// Reads YAML documents from a config directory
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// The directory must already exist
    pub fn new(config_dir: impl Into<PathBuf>) -> CalcResult<Self> {
        let config_dir = config_dir.into();
        if !config_dir.exists() {
            return Err(CalcError::Config(format!(
                "Config directory does not exist: {}",
                config_dir.display()
            )));
        }
        if !config_dir.is_dir() {
            return Err(CalcError::Config(format!(
                "Config path is not a directory: {}",
                config_dir.display()
            )));
        }
        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn load_app_config(&self) -> CalcResult<Value> {
        self.load_yaml_file(&self.config_dir.join(APP_CONFIG_FILE), "Application config")
    }

    pub fn load_team_config(&self, team_id: &str) -> CalcResult<Value> {
        if team_id.is_empty() || team_id.contains(['/', '\\', '.']) {
            return Err(CalcError::Config(format!("Invalid team id: '{}'", team_id)));
        }
        let path = self.teams_dir().join(format!("{}.yaml", team_id));
        self.load_yaml_file(&path, &format!("Team config ({})", team_id))
    }

    /// Ids of all `teams/*.yaml` files, sorted
    pub fn available_teams(&self) -> CalcResult<Vec<String>> {
        let teams_dir = self.teams_dir();
        if !teams_dir.is_dir() {
            return Err(CalcError::Config(format!(
                "Teams directory does not exist: {}",
                teams_dir.display()
            )));
        }

        let mut team_ids = Vec::new();
        for entry in fs::read_dir(&teams_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    team_ids.push(stem.to_string());
                }
            }
        }

        if team_ids.is_empty() {
            return Err(CalcError::Config(format!(
                "No team config files found in {}",
                teams_dir.display()
            )));
        }
        team_ids.sort();
        debug!(count = team_ids.len(), "team configs discovered");
        Ok(team_ids)
    }

    fn teams_dir(&self) -> PathBuf {
        self.config_dir.join(TEAMS_DIR)
    }

    fn load_yaml_file(&self, path: &Path, description: &str) -> CalcResult<Value> {
        if !path.exists() {
            return Err(CalcError::Config(format!(
                "{} file does not exist: {}",
                description,
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            CalcError::Config(format!(
                "Failed to read {}: {} - {}",
                description,
                path.display(),
                e
            ))
        })?;
        let value: Value = serde_yaml::from_str(&content).map_err(|e| {
            CalcError::Config(format!(
                "YAML syntax error in {}: {} - {}",
                description,
                path.display(),
                e
            ))
        })?;

        if value.is_null() {
            return Err(CalcError::Config(format!(
                "{} file is empty or invalid: {}",
                description,
                path.display()
            )));
        }
        debug!(path = %path.display(), "config loaded");
        Ok(value)
    }
}

/// Everything needed to run one team's calculation
#[derive(Debug, Clone)]
pub struct TeamSetup {
    pub team: Team,
    pub data_source: DataSourceConfig,
    pub data_format: DataFormat,
    pub rules: Vec<CalculationRule>,
}

/// Builds domain objects from team config documents
#[derive(Debug, Clone)]
pub struct TeamConfigManager {
    loader: ConfigLoader,
}

impl TeamConfigManager {
    pub fn new(loader: ConfigLoader) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &ConfigLoader {
        &self.loader
    }

    /// Every configured team keyed by id
    pub fn load_all_teams(&self) -> CalcResult<BTreeMap<String, Team>> {
        let mut teams = BTreeMap::new();
        for team_id in self.loader.available_teams()? {
            let team = self.load_team(&team_id)?;
            teams.insert(team_id, team);
        }
        info!(count = teams.len(), "teams loaded");
        Ok(teams)
    }

    pub fn load_team(&self, team_id: &str) -> CalcResult<Team> {
        let config = self.loader.load_team_config(team_id)?;
        team_from_config(&config, team_id)
    }

    pub fn load_team_data_format(&self, team_id: &str) -> CalcResult<DataFormat> {
        let config = self.loader.load_team_config(team_id)?;
        data_format_from_config(&config, team_id)
    }

    pub fn load_team_calculation_rules(&self, team_id: &str) -> CalcResult<Vec<CalculationRule>> {
        let config = self.loader.load_team_config(team_id)?;
        rules_from_config(&config, team_id)
    }

    pub fn load_team_data_source(&self, team_id: &str) -> CalcResult<DataSourceConfig> {
        let config = self.loader.load_team_config(team_id)?;
        data_source_from_config(&config, team_id)
    }

    /// Load every section of a team config from a single read
    pub fn load_team_setup(&self, team_id: &str) -> CalcResult<TeamSetup> {
        let config = self.loader.load_team_config(team_id)?;
        let setup = TeamSetup {
            team: team_from_config(&config, team_id)?,
            data_source: data_source_from_config(&config, team_id)?,
            data_format: data_format_from_config(&config, team_id)?,
            rules: rules_from_config(&config, team_id)?,
        };
        info!(
            team = team_id,
            columns = setup.data_format.columns().len(),
            rules = setup.rules.len(),
            "team setup loaded"
        );
        Ok(setup)
    }
}

fn team_from_config(config: &Value, team_id: &str) -> CalcResult<Team> {
    let section = config
        .get("team")
        .ok_or_else(|| CalcError::Config(format!("'team' section not found: {}", team_id)))?;

    let field = |key: &str| -> CalcResult<String> {
        match section.get(key).and_then(Value::as_str) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(CalcError::Config(format!(
                "Required field missing or empty: team.{} ({})",
                key, team_id
            ))),
        }
    };
    let id = field("id")?;
    let name = field("name")?;

    if id != team_id {
        return Err(CalcError::Config(format!(
            "Team id does not match file name: {} != {}",
            id, team_id
        )));
    }

    let description = section
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Team::new(id, name, description).map_err(|e| context(team_id, "team", e))
}

fn data_format_from_config(config: &Value, team_id: &str) -> CalcResult<DataFormat> {
    let section = config.get("data_format").ok_or_else(|| {
        CalcError::Config(format!("Data format section not found: {}", team_id))
    })?;
    parse_data_format(section).map_err(|e| context(team_id, "data format", e))
}

fn rules_from_config(config: &Value, team_id: &str) -> CalcResult<Vec<CalculationRule>> {
    let section = config.get("calculation_rules").ok_or_else(|| {
        CalcError::Config(format!("Calculation rules section not found: {}", team_id))
    })?;
    parse_calculation_rules(section).map_err(|e| context(team_id, "calculation rules", e))
}

fn data_source_from_config(config: &Value, team_id: &str) -> CalcResult<DataSourceConfig> {
    let section = config.get("data_source").ok_or_else(|| {
        CalcError::DataSource(format!("'data_source' section not found: {}", team_id))
    })?;
    serde_yaml::from_value(section.clone()).map_err(|e| {
        CalcError::DataSource(format!("Invalid data_source section ({}): {}", team_id, e))
    })
}

/// Config errors pass through; anything else is reported as a config error
/// naming the team and section
fn context(team_id: &str, section: &str, err: CalcError) -> CalcError {
    match err {
        CalcError::Config(_) => err,
        other => CalcError::Config(format!(
            "Failed to load {} ({}): {}",
            section, team_id, other
        )),
    }
}
