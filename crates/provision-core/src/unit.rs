use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// One touchpoint instruction attached to a unit for a given phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instruction {
    pub action: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl Instruction {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Bare action names are qualified with the owning touchpoint type, so
    /// `mkdir` on a `native` unit becomes `native.mkdir`.
    pub fn qualified_action(&self, touchpoint: Option<&str>) -> String {
        match touchpoint {
            Some(touchpoint) if !self.action.contains('.') => {
                format!("{touchpoint}.{}", self.action)
            }
            _ => self.action.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallableUnit {
    pub id: String,
    pub version: Version,
    #[serde(default)]
    pub touchpoint: Option<String>,
    #[serde(default)]
    pub instructions: BTreeMap<String, Vec<Instruction>>,
}

impl InstallableUnit {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
            touchpoint: None,
            instructions: BTreeMap::new(),
        }
    }

    pub fn with_touchpoint(mut self, touchpoint: impl Into<String>) -> Self {
        self.touchpoint = Some(touchpoint.into());
        self
    }

    pub fn with_instruction(mut self, phase_id: &str, instruction: Instruction) -> Self {
        self.instructions
            .entry(phase_id.to_string())
            .or_default()
            .push(instruction);
        self
    }

    pub fn instructions_for(&self, phase_id: &str) -> &[Instruction] {
        self.instructions
            .get(phase_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(anyhow!("unit id must not be empty"));
        }
        if id.len() != self.id.len() || id.chars().any(char::is_whitespace) {
            return Err(anyhow!("unit id must not contain whitespace: '{}'", self.id));
        }
        if let Some(touchpoint) = &self.touchpoint {
            if touchpoint.trim().is_empty() || touchpoint.contains('.') {
                return Err(anyhow!(
                    "unit '{}' declares invalid touchpoint type '{}'",
                    self.id,
                    touchpoint
                ));
            }
        }
        for (phase_id, instructions) in &self.instructions {
            for instruction in instructions {
                if instruction.action.trim().is_empty() {
                    return Err(anyhow!(
                        "unit '{}' has an empty action name in phase '{}'",
                        self.id,
                        phase_id
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for InstallableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}
