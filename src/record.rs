use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the offense/sentence history table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offense {
    pub offense_date: String,
    pub offense: String,
    pub sentence_date: String,
    pub county: String,
    pub case_no: String,
    /// Sentence length as printed by the source, e.g. `"10-00-00"` or `"180 Days"`.
    pub sentence: String,
}

/// Everything fetched for an assigned ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    /// `Key: Value` pairs from the admin section, keys trimmed.
    pub admin: BTreeMap<String, String>,
    pub offenses: Vec<Offense>,
    pub accessed: DateTime<Utc>,
}

impl Record {
    pub fn new(id: u64, admin: BTreeMap<String, String>, offenses: Vec<Offense>) -> Self {
        Self {
            id,
            admin,
            offenses,
            accessed: Utc::now(),
        }
    }
}

/// The two outcomes recorded per ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Assigned,
    Unassigned,
}

/// A Result Store entry. An assigned entry's ID is the record's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    Assigned(Record),
    Unassigned { id: u64 },
}

impl Entry {
    pub fn id(&self) -> u64 {
        match self {
            Entry::Assigned(record) => record.id,
            Entry::Unassigned { id } => *id,
        }
    }

    pub fn kind(&self) -> ResultKind {
        match self {
            Entry::Assigned(_) => ResultKind::Assigned,
            Entry::Unassigned { .. } => ResultKind::Unassigned,
        }
    }
}

impl From<Record> for Entry {
    fn from(record: Record) -> Self {
        Entry::Assigned(record)
    }
}
