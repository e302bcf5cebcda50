use crate::proto::data::{read_modify_write_rule, ReadModifyWriteRule};

/// Changes computed by the server from the latest value of each cell.
///
/// Rules run in order, so later rules see the results of earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadModifyWrite {
    rules: Vec<ReadModifyWriteRule>,
}

impl ReadModifyWrite {
    /// No rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` to the latest value of the cell, or to the empty string if there is none.
    pub fn append_value(
        &mut self,
        family: impl Into<String>,
        column: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) {
        self.rules.push(ReadModifyWriteRule {
            family_name: family.into(),
            column_qualifier: column.into(),
            rule: Some(read_modify_write_rule::Rule::AppendValue(value.into())),
        });
    }

    /// Add `delta` to the latest value of the cell, a 64-bit big-endian integer. A missing cell
    /// counts as zero.
    pub fn increment(&mut self, family: impl Into<String>, column: impl Into<Vec<u8>>, delta: i64) {
        self.rules.push(ReadModifyWriteRule {
            family_name: family.into(),
            column_qualifier: column.into(),
            rule: Some(read_modify_write_rule::Rule::IncrementAmount(delta)),
        });
    }

    pub(crate) fn rules(&self) -> &[ReadModifyWriteRule] {
        &self.rules
    }
}
