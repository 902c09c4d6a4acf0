use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::Context;

use super::SheetRow;

/// A `.csv` / `.tsv` export of a sheet. Every record is a row, including the header, and
/// every blank line is an empty row.
pub struct DelimitedSheet {
    path: String,
    delimiter: u8,
    lines: Option<Lines<BufReader<File>>>,
}

impl DelimitedSheet {
    pub fn open(path: &Path, delimiter: u8) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("open delimited file: {}", path.display()))?;
        Ok(Self {
            path: path.display().to_string(),
            delimiter,
            lines: Some(BufReader::new(file).lines()),
        })
    }

    /// The file is read forward once; a second call is an error.
    pub fn rows(&mut self) -> anyhow::Result<DelimitedRows> {
        let lines = self
            .lines
            .take()
            .with_context(|| format!("rows already consumed: {}", self.path))?;
        Ok(DelimitedRows {
            lines,
            delimiter: self.delimiter,
            number: 0,
            done: false,
        })
    }
}

/// Rows in physical order. The `csv` reader drops empty lines, so lines are split here and
/// only each record's text goes through `csv`.
pub struct DelimitedRows {
    lines: Lines<BufReader<File>>,
    delimiter: u8,
    number: usize,
    done: bool,
}

impl DelimitedRows {
    /// One physical line, plus continuation lines while a quoted field is still open.
    fn next_record_text(&mut self) -> Option<std::io::Result<String>> {
        let mut text = match self.lines.next()? {
            Ok(line) => line,
            Err(err) => return Some(Err(err)),
        };
        while has_open_quote(&text) {
            match self.lines.next() {
                Some(Ok(line)) => {
                    text.push('\n');
                    text.push_str(&line);
                }
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        Some(Ok(text))
    }

    fn parse(&self, text: &str) -> anyhow::Result<Vec<String>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(text.as_bytes());
        let mut record = csv::StringRecord::new();
        if !rdr.read_record(&mut record)? {
            return Ok(Vec::new());
        }
        Ok(record.iter().map(str::to_string).collect())
    }
}

fn has_open_quote(text: &str) -> bool {
    text.bytes().filter(|&b| b == b'"').count() % 2 == 1
}

impl Iterator for DelimitedRows {
    type Item = anyhow::Result<SheetRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let text = match self.next_record_text()? {
            Ok(text) => text,
            Err(err) => {
                self.done = true;
                return Some(Err(err).context(format!("read line after row {}", self.number)));
            }
        };
        let text = if self.number == 0 {
            text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text)
        } else {
            text
        };
        self.number += 1;
        if text.is_empty() {
            return Some(Ok(SheetRow {
                number: self.number,
                cells: Vec::new(),
            }));
        }
        match self.parse(&text) {
            Ok(cells) => Some(Ok(SheetRow {
                number: self.number,
                cells,
            })),
            Err(err) => {
                self.done = true;
                Some(Err(err).context(format!("parse row {}", self.number)))
            }
        }
    }
}

impl std::iter::FusedIterator for DelimitedRows {}
