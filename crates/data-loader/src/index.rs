//! RecordSet building from downloaded ingest files.
//!
//! Several CSVs can sit under the ingest prefix. They are parsed in parallel
//! with Rayon and concatenated in listing order, so positions are stable no
//! matter which file finishes first.

use crate::error::Result;
use crate::parser;
use crate::types::*;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// All input rows of one run, in input order.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<InputRecord>,
    files: usize,
}

impl RecordSet {
    /// Parse a list of `(file name, contents)` pairs into one ordered set.
    ///
    /// Fails on the first file (in listing order) whose schema or rows are
    /// invalid.
    pub fn from_files<'a, I>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let files: Vec<(&str, &[u8])> = files.into_iter().collect();

        let parsed: Vec<Result<Vec<InputRecord>>> = files
            .par_iter()
            .map(|(name, bytes)| parser::parse_input_csv(name, bytes, 0))
            .collect();

        let mut records = Vec::new();
        for file_records in parsed {
            for mut record in file_records? {
                record.position = records.len();
                records.push(record);
            }
        }

        Ok(Self {
            records,
            files: files.len(),
        })
    }

    /// Wrap already-parsed rows; positions are reassigned from order.
    pub fn from_records(records: Vec<InputRecord>) -> Self {
        let records = records
            .into_iter()
            .enumerate()
            .map(|(position, mut record)| {
                record.position = position;
                record
            })
            .collect();
        Self { records, files: 0 }
    }

    pub fn records(&self) -> &[InputRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<InputRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of files the set was built from
    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Distinct marketplace ids, in first-appearance order
    pub fn marketplaces(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.marketplace_id.as_str())
            .filter(|m| seen.insert(*m))
            .collect()
    }
}

/// Item ids that occur more than once, in first-appearance order.
pub fn find_duplicate_item_ids(records: &[InputRecord]) -> Vec<ItemId> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        *counts.entry(record.item_id.as_str()).or_insert(0) += 1;
    }

    let mut reported = HashSet::new();
    records
        .iter()
        .map(|r| r.item_id.as_str())
        .filter(|id| counts[id] > 1 && reported.insert(*id))
        .map(str::to_string)
        .collect()
}
