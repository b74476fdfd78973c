//! Registry of the STL files the FluidX3D examples expect.
//!
//! Each entry pairs a Thingiverse thing ID with the name of one STL file inside
//! that thing's download archive. The same thing may appear more than once when
//! a model is split across several files.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::fetch::{FetchError, Result};

/// Numeric identifier of a model page on Thingiverse
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingId(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ThingIdError {
    #[error("thing ID is empty")]
    Empty,
    #[error("thing ID must be numeric, got {0:?}")]
    NotNumeric(String),
}

impl ThingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ThingId {
    type Err = ThingIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Accept "thing:182114" as pasted from a page URL
        let s = s.trim();
        let s = s.strip_prefix("thing:").unwrap_or(s);
        if s.is_empty() {
            return Err(ThingIdError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ThingIdError::NotNumeric(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ThingId {
    type Error = ThingIdError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ThingId> for String {
    fn from(id: ThingId) -> Self {
        id.0
    }
}

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks that `name` can be joined onto an output directory without escaping it.
pub fn validate_file_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(FetchError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// One registered STL file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StlEntry {
    pub thing_id: ThingId,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl StlEntry {
    pub fn new(thing_id: ThingId, file_name: impl Into<String>) -> Self {
        Self {
            thing_id,
            file_name: file_name.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

const BUILTIN: &[(&str, &str, &str)] = &[
    ("1625155", "BELL222__FIXED.stl", "Bell 222 helicopter"),
    ("2772812", "techtris_airplane.stl", "Boeing 747"),
    ("814319", "Airplane.stl", "Cessna 172"),
    ("1176931", "concord_cut_large.stl", "Concorde"),
    ("182114", "Cow_t.stl", "Cow"),
    ("3014759", "edf_v39.stl", "EDF fighter jet (part 1)"),
    ("3014759", "edf_v391.stl", "EDF fighter jet (part 2)"),
    ("6113", "FAN_Solid_Bottom.stl", "Radial fan"),
    ("4975964", "Full_Shuttle.stl", "Space Shuttle"),
    ("4912729", "StarShipV2.stl", "SpaceX Starship"),
    ("2919109", "DWG_Tie_Fighter_Assembled_02.stl", "TIE Fighter"),
    ("353276", "X-Wing.stl", "X-Wing"),
];

/// The registry compiled into the binary, in download order
pub fn builtin() -> Vec<StlEntry> {
    BUILTIN
        .iter()
        .map(|(id, name, label)| StlEntry {
            thing_id: ThingId(id.to_string()),
            file_name: name.to_string(),
            label: Some(label.to_string()),
        })
        .collect()
}

/// Parses a registry from a JSON array of entries.
pub fn from_json(json: &str) -> Result<Vec<StlEntry>> {
    let entries: Vec<StlEntry> = serde_json::from_str(json)?;
    for entry in &entries {
        validate_file_name(&entry.file_name)?;
    }
    Ok(entries)
}

/// Loads a registry file, replacing the built-in list.
pub async fn load(path: &Path) -> Result<Vec<StlEntry>> {
    tracing::debug!(registry = ?path, "Loading registry file");
    let json = tokio::fs::read_to_string(path).await?;
    let entries = from_json(&json)?;
    tracing::info!(registry = ?path, entries = entries.len(), "Loaded registry");
    Ok(entries)
}
