use crate::error::{CalcError, CalcResult};
use regex::Regex;
use serde::Serialize;

const TEAM_ID_PATTERN: &str = r"^[A-Za-z0-9_]+$";

/// A team owning one data source, data format and rule list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Team {
    id: String,
    name: String,
    description: String,
}

impl Team {
    /// Build a team; the id is restricted to ASCII letters, digits and `_`
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> CalcResult<Self> {
        let id = id.into();
        let name = name.into();

        if id.is_empty() {
            return Err(CalcError::Validation("Team id is required".to_string()));
        }
        if name.is_empty() {
            return Err(CalcError::Validation("Team name is required".to_string()));
        }
        if !is_valid_id(&id)? {
            return Err(CalcError::Validation(format!(
                "Team id '{}' may only contain letters, digits and underscores",
                id
            )));
        }

        Ok(Self {
            id,
            name,
            description: description.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

fn is_valid_id(id: &str) -> CalcResult<bool> {
    let pattern = Regex::new(TEAM_ID_PATTERN)
        .map_err(|e| CalcError::Validation(format!("Invalid team id pattern: {}", e)))?;
    Ok(pattern.is_match(id))
}
