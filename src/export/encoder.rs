// ABOUTME: Incremental CSV encoding of one table's header and rows
// ABOUTME: Hands out encoded chunks so a table is never buffered whole

use crate::source::RowFields;
use anyhow::{bail, Context, Result};
use csv::{Terminator, WriterBuilder};

/// Encoded bytes are handed to the archive once this much has accumulated
pub const CHUNK_SIZE: usize = 64 * 1024;

/// RFC-4180 style encoder for a single table
///
/// The encoder only ever owns an in-memory buffer. Handing a chunk to the
/// archive leaves the archive entry, and the archive itself, open.
pub struct CsvEncoder {
    writer: csv::Writer<Vec<u8>>,
    width: usize,
    rows: u64,
}

impl CsvEncoder {
    /// Write the header record; every later row must have the same width
    pub fn with_header(columns: &[String]) -> Result<Self> {
        let mut encoder = Self {
            writer: new_writer(),
            width: columns.len(),
            rows: 0,
        };
        encoder
            .writer
            .write_record(columns)
            .context("Failed to encode CSV header")?;
        Ok(encoder)
    }

    pub fn write_row(&mut self, fields: &RowFields) -> Result<()> {
        if fields.len() != self.width {
            bail!(
                "Row {} has {} fields but the header has {}",
                self.rows + 1,
                fields.len(),
                self.width
            );
        }
        // NULL is written as an empty field
        self.writer
            .write_record(fields.iter().map(|f| f.as_deref().unwrap_or("")))
            .with_context(|| format!("Failed to encode CSV row {}", self.rows + 1))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Bytes already encoded and waiting to be handed out
    pub fn pending(&self) -> usize {
        self.writer.get_ref().len()
    }

    /// Flush and hand out everything encoded so far
    pub fn take_chunk(&mut self) -> Result<Vec<u8>> {
        let writer = std::mem::replace(&mut self.writer, new_writer());
        writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to flush CSV encoder")
    }
}

fn new_writer() -> csv::Writer<Vec<u8>> {
    WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::CRLF)
        .from_writer(Vec::with_capacity(CHUNK_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn row(values: &[Option<&str>]) -> RowFields {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_header_and_rows() {
        let mut encoder = CsvEncoder::with_header(&header(&["id", "name"])).unwrap();
        encoder.write_row(&row(&[Some("1"), Some("Alice")])).unwrap();
        encoder.write_row(&row(&[Some("2"), None])).unwrap();

        let chunk = encoder.take_chunk().unwrap();
        assert_eq!(String::from_utf8(chunk).unwrap(), "id,name\r\n1,Alice\r\n2,\r\n");
        assert_eq!(encoder.rows(), 2);
    }

    #[test]
    fn test_quoting_of_special_characters() {
        let mut encoder = CsvEncoder::with_header(&header(&["note"])).unwrap();
        encoder
            .write_row(&row(&[Some("say \"hi\", then\nleave")]))
            .unwrap();

        let chunk = String::from_utf8(encoder.take_chunk().unwrap()).unwrap();
        assert_eq!(chunk, "note\r\n\"say \"\"hi\"\", then\nleave\"\r\n");
    }

    #[test]
    fn test_rejects_misaligned_rows() {
        let mut encoder = CsvEncoder::with_header(&header(&["a", "b"])).unwrap();
        let err = encoder.write_row(&row(&[Some("1")])).unwrap_err();
        assert!(err.to_string().contains("has 1 fields but the header has 2"));
    }

    #[test]
    fn test_chunks_concatenate_to_full_output() {
        let mut encoder = CsvEncoder::with_header(&header(&["n"])).unwrap();
        let mut out = Vec::new();
        for i in 0..1000 {
            encoder.write_row(&vec![Some(i.to_string())]).unwrap();
            if i % 100 == 0 {
                out.extend(encoder.take_chunk().unwrap());
            }
        }
        out.extend(encoder.take_chunk().unwrap());

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1001);
        assert_eq!(lines[0], "n");
        assert_eq!(lines[1000], "999");
        assert!(encoder.take_chunk().unwrap().is_empty());
    }
}
