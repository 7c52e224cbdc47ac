/// Record Module
///
/// A record is one row: a fixed number of field slots, the table it came
/// from, the mode it was opened in, and optional primary-key and
/// auto-increment positions used by higher layers building upserts.
use crate::core::db::field::Field;
use crate::core::{DbError, Result};
use std::collections::HashMap;

/// Access mode a record was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    None,
    /// Read only
    Read,
    /// Read and write
    Edit,
}

/// Something that resolves to a field position within a record.
///
/// Implemented for `usize` (position) and `&str` (field name) so that the
/// same accessor serves both lookup styles.
pub trait FieldIndex {
    fn idx(&self, record: &Record) -> Result<usize>;
}

impl FieldIndex for usize {
    fn idx(&self, record: &Record) -> Result<usize> {
        if *self < record.field_count() {
            Ok(*self)
        } else {
            debug_assert!(false, "field index {} out of range for `{}`", self, record.table_name);
            Err(DbError::IndexOutOfRange {
                index: *self,
                len: record.field_count(),
            })
        }
    }
}

impl FieldIndex for &str {
    fn idx(&self, record: &Record) -> Result<usize> {
        match record.name_to_idx.get(*self) {
            Some(idx) => Ok(*idx),
            None => {
                debug_assert!(false, "unknown field `{}` on `{}`", self, record.table_name);
                Err(DbError::UnknownField(self.to_string()))
            }
        }
    }
}

impl FieldIndex for &String {
    fn idx(&self, record: &Record) -> Result<usize> {
        self.as_str().idx(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table_name: String,
    mode: Mode,
    fields: Vec<Option<Field>>,
    name_to_idx: HashMap<String, usize>,
    key_idx: Option<usize>,
    auto_inc_idx: Option<usize>,
}

impl Record {
    /// Creates a record with `field_count` empty slots.
    pub fn new(field_count: usize, table_name: impl Into<String>, mode: Mode) -> Self {
        Record {
            table_name: table_name.into(),
            mode,
            fields: vec![None; field_count],
            name_to_idx: HashMap::with_capacity(field_count),
            key_idx: None,
            auto_inc_idx: None,
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Installs `field` at `idx`, taking ownership and registering its name.
    ///
    /// A field previously at `idx` is replaced and its name unregistered.
    pub fn write_field(&mut self, idx: usize, field: Field) -> Result<()> {
        let idx = idx.idx(self)?;
        if let Some(old) = self.fields[idx].take() {
            if self.name_to_idx.get(old.name()) == Some(&idx) {
                self.name_to_idx.remove(old.name());
            }
        }
        self.name_to_idx.insert(field.name().to_string(), idx);
        self.fields[idx] = Some(field);
        Ok(())
    }

    /// Position of the field called `name`.
    pub fn field_idx(&self, name: &str) -> Result<usize> {
        name.idx(self)
    }

    pub fn field<I: FieldIndex>(&self, at: I) -> Result<&Field> {
        let idx = at.idx(self)?;
        self.fields[idx].as_ref().ok_or(DbError::EmptyField(idx))
    }

    fn field_mut<I: FieldIndex>(&mut self, at: I) -> Result<&mut Field> {
        if self.mode == Mode::Read {
            return Err(DbError::ReadOnlyRecord);
        }
        let idx = at.idx(self)?;
        self.fields[idx].as_mut().ok_or(DbError::EmptyField(idx))
    }

    pub fn get_int<I: FieldIndex>(&self, at: I) -> Result<i64> {
        self.field(at)?.get_int()
    }

    pub fn get_double<I: FieldIndex>(&self, at: I) -> Result<f64> {
        self.field(at)?.get_double()
    }

    pub fn get_str<I: FieldIndex>(&self, at: I) -> Result<&str> {
        self.field(at)?.get_str()
    }

    pub fn get_blob<I: FieldIndex>(&self, at: I) -> Result<&[u8]> {
        self.field(at)?.get_blob()
    }

    pub fn set_int<I: FieldIndex>(&mut self, at: I, val: i64) -> Result<()> {
        self.field_mut(at)?.set_int(val)
    }

    pub fn set_double<I: FieldIndex>(&mut self, at: I, val: f64) -> Result<()> {
        self.field_mut(at)?.set_double(val)
    }

    pub fn set_str<I: FieldIndex>(&mut self, at: I, val: &str) -> Result<()> {
        self.field_mut(at)?.set_str(val)
    }

    pub fn set_blob<I: FieldIndex>(&mut self, at: I, val: &[u8]) -> Result<()> {
        self.field_mut(at)?.set_blob(val)
    }

    pub fn is_changed<I: FieldIndex>(&self, at: I) -> Result<bool> {
        Ok(self.field(at)?.is_changed())
    }

    /// Fields modified since the last `clear_edit_flags`, with their positions.
    pub fn changed_fields(&self) -> impl Iterator<Item = (usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|f| (idx, f)))
            .filter(|(_, field)| field.is_changed())
    }

    /// Clears every field's dirty flag, typically after a committed write-back.
    pub fn clear_edit_flags(&mut self) {
        for field in self.fields.iter_mut().flatten() {
            field.tag_changed(false);
        }
    }

    pub fn key_idx(&self) -> Option<usize> {
        self.key_idx
    }

    pub fn set_key_idx(&mut self, idx: Option<usize>) -> Result<()> {
        self.key_idx = idx.map(|i| i.idx(self)).transpose()?;
        Ok(())
    }

    pub fn auto_inc_idx(&self) -> Option<usize> {
        self.auto_inc_idx
    }

    pub fn set_auto_inc_idx(&mut self, idx: Option<usize>) -> Result<()> {
        self.auto_inc_idx = idx.map(|i| i.idx(self)).transpose()?;
        Ok(())
    }

    /// Iterates over populated fields in column order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().flatten()
    }
}
