//! Reassembly of streamed cell chunks into rows.

use super::mutation::Timestamp;
use super::row::{ReadItem, Row};
use crate::error::{Error, Result};
use crate::proto::data::read_rows_response::{cell_chunk::RowStatus, CellChunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NewRow,
    RowInProgress,
    CellInProgress,
}

/// Turns the chunks of a `ReadRows` stream into complete rows.
#[derive(Debug)]
pub(crate) struct ChunkReader {
    state: State,
    reversed: bool,
    last_key: Option<Vec<u8>>,
    row: Row,
    family: String,
    qualifier: Vec<u8>,
    timestamp: i64,
    labels: Vec<String>,
    value: Vec<u8>,
}

impl ChunkReader {
    pub(crate) fn new(reversed: bool) -> Self {
        Self {
            state: State::NewRow,
            reversed,
            last_key: None,
            row: Row::default(),
            family: String::new(),
            qualifier: Vec::new(),
            timestamp: 0,
            labels: Vec::new(),
            value: Vec::new(),
        }
    }

    /// The key of the last committed row.
    pub(crate) fn last_key(&self) -> Option<&[u8]> {
        self.last_key.as_deref()
    }

    /// Feed one chunk. Returns the row it commits, if any.
    pub(crate) fn process(&mut self, chunk: CellChunk) -> Result<Option<Row>> {
        let reset = matches!(chunk.row_status, Some(RowStatus::ResetRow(true)));
        let commit = matches!(chunk.row_status, Some(RowStatus::CommitRow(true)));

        match self.state {
            State::NewRow => {
                self.validate_new_row(&chunk, reset)?;
                self.row = Row::new(chunk.row_key.clone());
                self.start_cell(chunk, commit)
            }
            State::RowInProgress => {
                if reset {
                    Self::validate_reset(&chunk)?;
                    self.reset();
                    return Ok(None);
                }
                if !chunk.row_key.is_empty() && chunk.row_key != self.row.key() {
                    return Err(Error::malformed("row key changed mid-row"));
                }
                if chunk.family_name.is_some() && chunk.qualifier.is_none() {
                    return Err(Error::malformed("new family without a qualifier"));
                }
                self.start_cell(chunk, commit)
            }
            State::CellInProgress => {
                if reset {
                    Self::validate_reset(&chunk)?;
                    self.reset();
                    return Ok(None);
                }
                if !chunk.row_key.is_empty() && chunk.row_key != self.row.key() {
                    return Err(Error::malformed("row key changed mid-cell"));
                }
                if chunk.family_name.is_some()
                    || chunk.qualifier.is_some()
                    || chunk.timestamp_micros != 0
                    || !chunk.labels.is_empty()
                {
                    return Err(Error::malformed("cell continuation carries a new cell header"));
                }
                self.value.extend_from_slice(&chunk.value);
                self.continue_cell(chunk.value_size, commit)
            }
        }
    }

    /// Signal the end of the stream. Fails if a row is still open.
    pub(crate) fn close(&self) -> Result<()> {
        if self.state == State::NewRow {
            Ok(())
        } else {
            Err(Error::malformed("response stream ended mid-row"))
        }
    }

    fn validate_new_row(&self, chunk: &CellChunk, reset: bool) -> Result<()> {
        if reset {
            return Err(Error::malformed("reset_row with no row in progress"));
        }
        if chunk.row_key.is_empty() {
            return Err(Error::malformed("new row is missing a row key"));
        }
        if chunk.family_name.is_none() {
            return Err(Error::malformed("new row is missing a family name"));
        }
        if chunk.qualifier.is_none() {
            return Err(Error::malformed("new row is missing a qualifier"));
        }
        if let Some(last) = &self.last_key {
            let in_order = if self.reversed {
                chunk.row_key < *last
            } else {
                chunk.row_key > *last
            };
            if !in_order {
                return Err(Error::malformed("row keys are out of order"));
            }
        }
        Ok(())
    }

    fn validate_reset(chunk: &CellChunk) -> Result<()> {
        if !chunk.row_key.is_empty()
            || chunk.family_name.is_some()
            || chunk.qualifier.is_some()
            || chunk.timestamp_micros != 0
            || !chunk.labels.is_empty()
            || !chunk.value.is_empty()
            || chunk.value_size != 0
        {
            return Err(Error::malformed("reset_row carries data"));
        }
        Ok(())
    }

    fn start_cell(&mut self, chunk: CellChunk, commit: bool) -> Result<Option<Row>> {
        if let Some(family) = chunk.family_name {
            self.family = family;
        }
        if let Some(qualifier) = chunk.qualifier {
            self.qualifier = qualifier;
        }
        self.timestamp = chunk.timestamp_micros;
        self.labels = chunk.labels;
        self.value = chunk.value;
        if chunk.value_size > 0 {
            self.value.reserve(usize::try_from(chunk.value_size).unwrap_or(0));
        }
        self.continue_cell(chunk.value_size, commit)
    }

    fn continue_cell(&mut self, value_size: i32, commit: bool) -> Result<Option<Row>> {
        if value_size > 0 {
            if commit {
                return Err(Error::malformed("commit_row in the middle of a cell"));
            }
            self.state = State::CellInProgress;
            return Ok(None);
        }

        let item = ReadItem {
            row: self.row.key().to_vec(),
            column: format!("{}:{}", self.family, String::from_utf8_lossy(&self.qualifier)),
            qualifier: self.qualifier.clone(),
            timestamp: Timestamp::from_micros(self.timestamp),
            value: std::mem::take(&mut self.value),
            labels: std::mem::take(&mut self.labels),
        };
        self.row.push(&self.family, item);
        self.state = State::RowInProgress;

        if !commit {
            return Ok(None);
        }
        let row = std::mem::take(&mut self.row);
        self.last_key = Some(row.key().to_vec());
        self.reset();
        Ok(Some(row))
    }

    fn reset(&mut self) {
        self.state = State::NewRow;
        self.row = Row::default();
        self.family.clear();
        self.qualifier.clear();
        self.timestamp = 0;
        self.labels.clear();
        self.value.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cell(key: &str, family: &str, qualifier: &str, ts: i64, value: &str) -> CellChunk {
        CellChunk {
            row_key: key.as_bytes().to_vec(),
            family_name: Some(family.to_owned()),
            qualifier: Some(qualifier.as_bytes().to_vec()),
            timestamp_micros: ts,
            value: value.as_bytes().to_vec(),
            ..CellChunk::default()
        }
    }

    fn commit(mut chunk: CellChunk) -> CellChunk {
        chunk.row_status = Some(RowStatus::CommitRow(true));
        chunk
    }

    #[test]
    fn test_two_cells_one_row() -> Result<(), Box<dyn std::error::Error>> {
        let mut reader = ChunkReader::new(false);
        assert!(reader.process(cell("r1", "f", "a", 20, "x"))?.is_none());
        let next = CellChunk {
            qualifier: Some(b"b".to_vec()),
            timestamp_micros: 10,
            value: b"y".to_vec(),
            ..CellChunk::default()
        };
        let row = reader.process(commit(next))?.ok_or("no row")?;
        assert_eq!(row.key(), b"r1");
        let columns: Vec<_> = row.cells().map(|c| c.column.as_str()).collect();
        assert_eq!(columns, ["f:a", "f:b"]);
        reader.close()?;
        assert_eq!(reader.last_key(), Some(&b"r1"[..]));
        Ok(())
    }

    #[test]
    fn test_split_value() -> Result<(), Box<dyn std::error::Error>> {
        let mut reader = ChunkReader::new(false);
        let mut first = cell("r1", "f", "a", 1, "hel");
        first.value_size = 5;
        assert!(reader.process(first)?.is_none());
        assert!(reader.close().is_err());
        let rest = CellChunk {
            value: b"lo".to_vec(),
            ..CellChunk::default()
        };
        let row = reader.process(commit(rest))?.ok_or("no row")?;
        assert_eq!(row.latest("f", "a").map(|c| c.value.as_slice()), Some(&b"hello"[..]));
        Ok(())
    }

    #[test]
    fn test_reset_discards_row() -> Result<(), Box<dyn std::error::Error>> {
        let mut reader = ChunkReader::new(false);
        assert!(reader.process(cell("r1", "f", "a", 1, "x"))?.is_none());
        let reset = CellChunk {
            row_status: Some(RowStatus::ResetRow(true)),
            ..CellChunk::default()
        };
        assert!(reader.process(reset)?.is_none());
        reader.close()?;
        let row = reader.process(commit(cell("r1", "f", "a", 1, "z")))?.ok_or("no row")?;
        assert_eq!(row.cells().count(), 1);
        Ok(())
    }

    #[test]
    fn test_rejects_malformed_streams() -> Result<(), Box<dyn std::error::Error>> {
        let mut reader = ChunkReader::new(false);
        let mut missing_family = cell("r1", "f", "a", 1, "x");
        missing_family.family_name = None;
        assert!(matches!(reader.process(missing_family), Err(Error::Malformed(_))));

        let mut reader = ChunkReader::new(false);
        let _row = reader.process(commit(cell("r2", "f", "a", 1, "x")))?;
        assert!(matches!(
            reader.process(commit(cell("r1", "f", "a", 1, "x"))),
            Err(Error::Malformed(_))
        ));

        let mut reader = ChunkReader::new(true);
        let _row = reader.process(commit(cell("r2", "f", "a", 1, "x")))?;
        assert!(reader.process(commit(cell("r1", "f", "a", 1, "x")))?.is_some());

        let mut reader = ChunkReader::new(false);
        let _none = reader.process(cell("r1", "f", "a", 1, "x"))?;
        let dirty_reset = CellChunk {
            value: b"v".to_vec(),
            row_status: Some(RowStatus::ResetRow(true)),
            ..CellChunk::default()
        };
        assert!(matches!(reader.process(dirty_reset), Err(Error::Malformed(_))));

        let mut reader = ChunkReader::new(false);
        let mut split = cell("r1", "f", "a", 1, "x");
        split.value_size = 2;
        split.row_status = Some(RowStatus::CommitRow(true));
        assert!(matches!(reader.process(split), Err(Error::Malformed(_))));
        Ok(())
    }
}
