//! Query results.

use std::rc::Rc;

use crate::protocol::message::{ErrorFields, FieldDescription};
use crate::types::PgValue;

/// Outcome of one executed statement.
///
/// Application-level backend errors (constraint violations, bad SQL) land in
/// [`PgResult::error`]: the operation itself completed, the connection stays
/// usable, and the caller decides what the error payload means.
#[derive(Debug, Clone, Default)]
pub struct PgResult {
    /// Decoded result rows, in arrival order.
    pub rows:        Vec<PgRow>,
    /// Command tag from CommandComplete, e.g. `SELECT 3`.
    pub command_tag: Option<String>,
    /// Error payload from the backend, if the statement failed.
    pub error:       Option<ErrorFields>,
}

impl PgResult {
    /// Whether the backend reported an error for this statement.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Rows affected, parsed from the command tag (`INSERT 0 5` → 5).
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        let tag = self.command_tag.as_deref()?;
        tag.rsplit(' ').next()?.parse().ok()
    }
}

/// One decoded result row.
#[derive(Debug, Clone)]
pub struct PgRow {
    fields: Rc<Vec<FieldDescription>>,
    values: Vec<PgValue>,
}

impl PgRow {
    pub(crate) fn new(fields: Rc<Vec<FieldDescription>>, values: Vec<PgValue>) -> Self {
        Self { fields, values }
    }

    /// Column value by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index)
    }

    /// Column value by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&PgValue> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        self.values.get(idx)
    }

    /// Column descriptors shared by every row of the result.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// All values, in column order.
    #[must_use]
    pub fn values(&self) -> &[PgValue] {
        &self.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> FieldDescription {
        FieldDescription {
            name:          name.to_string(),
            table_oid:     0,
            column_attr:   0,
            type_oid:      crate::protocol::constants::OID_INT8,
            type_size:     8,
            type_modifier: -1,
            format:        0,
        }
    }

    #[test]
    fn lookup_by_name_and_index() {
        let fields = Rc::new(vec![field("id"), field("score")]);
        let row = PgRow::new(fields, vec![PgValue::Int8(1), PgValue::Int8(99)]);

        assert_eq!(row.get(1), Some(&PgValue::Int8(99)));
        assert_eq!(row.by_name("id"), Some(&PgValue::Int8(1)));
        assert_eq!(row.by_name("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn rows_affected_parses_command_tags() {
        let mut result = PgResult::default();
        result.command_tag = Some("INSERT 0 5".to_string());
        assert_eq!(result.rows_affected(), Some(5));

        result.command_tag = Some("SELECT 12".to_string());
        assert_eq!(result.rows_affected(), Some(12));

        result.command_tag = None;
        assert_eq!(result.rows_affected(), None);
    }
}
