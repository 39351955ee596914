//! JSON checkpoint files holding one [`Record`] per bookmark.
//!
//! Every stage file is a complete, ordered snapshot of all records. Files are
//! rewritten whole on each checkpoint.

use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CurateError;

/// One bookmark and everything the stages have learned about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: usize,
    pub url: String,
    pub user_title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_tags: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

impl Record {
    pub fn new(id: usize, url: impl Into<String>, user_title: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            user_title: user_title.into(),
            status: None,
            site_title: None,
            seo_keywords: None,
            seo_description: None,
            error_detail: None,
            ai_tags: None,
            category: None,
            subcategory: None,
        }
    }

    pub fn is_enriched(&self) -> bool {
        matches!(self.status, Some(ref s) if *s != Status::Pending)
    }

    pub fn is_tagged(&self) -> bool {
        self.ai_tags.is_some()
    }

    pub fn is_categorized(&self) -> bool {
        self.category.is_some()
    }
}

/// Liveness of a bookmark as seen by the metadata fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    Pending,
    Alive,
    Dead,
    AliveButBlocked,
    Error,
    Unknown(u16),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => f.write_str("pending"),
            Status::Alive => f.write_str("alive"),
            Status::Dead => f.write_str("dead"),
            Status::AliveButBlocked => f.write_str("alive_but_blocked"),
            Status::Error => f.write_str("error"),
            Status::Unknown(code) => write!(f, "unknown_{}", code),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, String> {
        match s.as_str() {
            "pending" => Ok(Status::Pending),
            "alive" => Ok(Status::Alive),
            "dead" => Ok(Status::Dead),
            "alive_but_blocked" => Ok(Status::AliveButBlocked),
            "error" => Ok(Status::Error),
            other => other
                .strip_prefix("unknown_")
                .and_then(|code| code.parse::<u16>().ok())
                .map(Status::Unknown)
                .ok_or_else(|| format!("unrecognised status '{}'", other)),
        }
    }
}

/// Load a stage file. `hint` names the command that produces it.
pub fn load(path: &Path, hint: &'static str) -> Result<Vec<Record>> {
    if !path.exists() {
        return Err(CurateError::MissingInput {
            path: path.to_path_buf(),
            hint,
        }
        .into());
    }
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let records: Vec<Record> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parse {}", path.display()))?;
    validate(&records)?;
    Ok(records)
}

/// Load a stage's own earlier output, if any, for resuming.
pub fn load_previous(path: &Path) -> Result<Option<Vec<Record>>> {
    if !path.exists() {
        return Ok(None);
    }
    load(path, "").map(Some)
}

/// Rewrite `path` with the full record list.
pub fn save(path: &Path, records: &[Record]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .with_context(|| format!("serialize {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Ids are positions: unique, dense, never reordered.
pub fn validate(records: &[Record]) -> Result<(), CurateError> {
    for (position, record) in records.iter().enumerate() {
        if record.id != position {
            return Err(CurateError::InconsistentRecords(format!(
                "record at position {} has id {} ({})",
                position, record.id, record.url
            )));
        }
    }
    Ok(())
}
