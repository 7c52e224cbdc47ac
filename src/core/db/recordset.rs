/// Recordset Module
///
/// The rows returned by a read query. Records are owned by the set until
/// popped; popping compacts the set, so indices past the popped slot shift
/// down by one.
use crate::core::db::record::Record;
use crate::core::{DbError, Result};
use std::ops::Index;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recordset {
    records: Vec<Record>,
}

impl Recordset {
    pub fn new() -> Self {
        Recordset::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_idx(&self, idx: usize) -> Result<()> {
        if idx < self.records.len() {
            return Ok(());
        }
        debug_assert!(false, "record index {} out of range (len {})", idx, self.records.len());
        Err(DbError::IndexOutOfRange {
            index: idx,
            len: self.records.len(),
        })
    }

    /// Borrows the record at `idx` without transferring ownership.
    pub fn get_record(&self, idx: usize) -> Result<&Record> {
        self.check_idx(idx)?;
        Ok(&self.records[idx])
    }

    pub fn get_record_mut(&mut self, idx: usize) -> Result<&mut Record> {
        self.check_idx(idx)?;
        Ok(&mut self.records[idx])
    }

    /// Removes the record at `idx` and hands it to the caller.
    ///
    /// Records after `idx` move down one position.
    pub fn pop_record(&mut self, idx: usize) -> Result<Record> {
        self.check_idx(idx)?;
        Ok(self.records.remove(idx))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
}

impl From<Vec<Record>> for Recordset {
    fn from(records: Vec<Record>) -> Self {
        Recordset { records }
    }
}

impl Index<usize> for Recordset {
    type Output = Record;

    fn index(&self, idx: usize) -> &Record {
        &self.records[idx]
    }
}

impl IntoIterator for Recordset {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a Recordset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
