use super::mutation::Timestamp;
use crate::proto::data;
use std::collections::BTreeMap;

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadItem {
    /// The row key.
    pub row: Vec<u8>,
    /// `family:qualifier`, with a qualifier that is not UTF-8 rendered lossily.
    pub column: String,
    /// The column qualifier as stored.
    pub qualifier: Vec<u8>,
    /// When the cell was written.
    pub timestamp: Timestamp,
    /// The cell value. Empty when the read stripped values.
    pub value: Vec<u8>,
    /// Labels applied by the read's filter.
    pub labels: Vec<String>,
}

/// The cells of one row, grouped by family.
///
/// Within a family, cells are ordered by qualifier and then from newest to oldest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    key: Vec<u8>,
    families: BTreeMap<String, Vec<ReadItem>>,
}

impl Row {
    pub(crate) fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            families: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, family: &str, item: ReadItem) {
        self.families.entry(family.to_owned()).or_default().push(item);
    }

    /// The row key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The cells of `family`, if the row has any.
    #[must_use]
    pub fn family(&self, family: &str) -> Option<&[ReadItem]> {
        self.families.get(family).map(Vec::as_slice)
    }

    /// Families and their cells, ordered by family name.
    pub fn families(&self) -> impl Iterator<Item = (&str, &[ReadItem])> {
        self.families
            .iter()
            .map(|(name, items)| (name.as_str(), items.as_slice()))
    }

    /// Every cell, family by family.
    pub fn cells(&self) -> impl Iterator<Item = &ReadItem> {
        self.families.values().flatten()
    }

    /// The newest cell of a column.
    #[must_use]
    pub fn latest(&self, family: &str, qualifier: impl AsRef<[u8]>) -> Option<&ReadItem> {
        let qualifier = qualifier.as_ref();
        self.family(family)?
            .iter()
            .find(|item| item.qualifier == qualifier)
    }

    /// Whether the row has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Build a row from the representation returned by read-modify-write.
    pub(crate) fn from_proto(row: data::Row) -> Self {
        let mut result = Self::new(row.key);
        for family in row.families {
            for column in family.columns {
                let name = format!("{}:{}", family.name, String::from_utf8_lossy(&column.qualifier));
                for cell in column.cells {
                    result.push(
                        &family.name,
                        ReadItem {
                            row: result.key.clone(),
                            column: name.clone(),
                            qualifier: column.qualifier.clone(),
                            timestamp: Timestamp::from_micros(cell.timestamp_micros),
                            value: cell.value,
                            labels: cell.labels,
                        },
                    );
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_proto() {
        let row = Row::from_proto(data::Row {
            key: b"r1".to_vec(),
            families: vec![data::Family {
                name: "counters".to_owned(),
                columns: vec![data::Column {
                    qualifier: b"hits".to_vec(),
                    cells: vec![data::Cell {
                        timestamp_micros: 5_000,
                        value: 7_i64.to_be_bytes().to_vec(),
                        labels: Vec::new(),
                    }],
                }],
            }],
        });
        assert_eq!(row.key(), b"r1");
        let item = row.latest("counters", "hits");
        assert_eq!(item.map(|i| i.value.as_slice()), Some(&7_i64.to_be_bytes()[..]));
        assert_eq!(row.cells().count(), 1);
        assert!(row.family("missing").is_none());
    }

    #[test]
    fn test_binary_qualifiers_stay_distinct() {
        let column = |qualifier: &[u8], value: &[u8]| data::Column {
            qualifier: qualifier.to_vec(),
            cells: vec![data::Cell {
                timestamp_micros: 1_000,
                value: value.to_vec(),
                labels: Vec::new(),
            }],
        };
        let row = Row::from_proto(data::Row {
            key: b"r".to_vec(),
            families: vec![data::Family {
                name: "f".to_owned(),
                columns: vec![column(&[0xfe_u8], b"low"), column(&[0xff_u8], b"high")],
            }],
        });
        let qualifiers: Vec<_> = row.cells().map(|item| item.qualifier.as_slice()).collect();
        assert_eq!(qualifiers, [&[0xfe_u8][..], &[0xff_u8][..]]);
        assert_eq!(row.latest("f", [0xff_u8]).map(|i| i.value.as_slice()), Some(&b"high"[..]));
        assert_eq!(row.latest("f", [0xfe_u8]).map(|i| i.value.as_slice()), Some(&b"low"[..]));
    }
}
