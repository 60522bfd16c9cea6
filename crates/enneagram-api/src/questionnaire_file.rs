use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use enneagram_core::{ArchetypeTable, Questionnaire, QuestionnaireItem};
use serde::{Deserialize, Serialize};

/// On-disk questionnaire configuration.
///
/// ```yaml
/// items:
///   - id: 1
///     text: "..."
///     type_slot: 3
/// archetypes:
///   1: { name: "Tipo 1", archetype: "O Perfeccionista", strengths: [], weaknesses: [] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionnaireFile {
    pub items: Vec<QuestionnaireItem>,
    pub archetypes: ArchetypeTable,
}

impl QuestionnaireFile {
    /// # Errors
    /// Returns an error when the file cannot be read or is not a valid questionnaire.
    pub fn from_file(path: &Path) -> Result<Questionnaire> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read questionnaire file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("invalid questionnaire file {}", path.display()))
    }

    /// Parse and validate a YAML questionnaire document.
    ///
    /// # Errors
    /// Returns an error for YAML syntax errors, out-of-range slots, duplicate item ids,
    /// or archetype tables that do not cover every slot. Validation failures carry a
    /// [`enneagram_core::CoreError::MalformedInput`].
    pub fn parse(yaml: &str) -> Result<Questionnaire> {
        let file: Self = serde_yaml::from_str(yaml).context("failed to parse questionnaire YAML")?;
        Ok(Questionnaire::new(file.items, file.archetypes)?)
    }
}

impl From<&Questionnaire> for QuestionnaireFile {
    fn from(value: &Questionnaire) -> Self {
        Self { items: value.items().to_vec(), archetypes: value.archetypes().clone() }
    }
}
