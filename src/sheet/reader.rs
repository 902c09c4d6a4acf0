use crate::config::{ColumnSpec, ColumnsSection};
use crate::ir::RawRow;

use super::SheetRow;

/// Counters for rows the reader consumed without yielding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub rows_seen: usize,
    pub rows_skipped: usize,
    pub rows_dropped_short: usize,
    pub rows_dropped_blank: usize,
    pub rows_yielded: usize,
}

/// Maps physical sheet rows to [`RawRow`]s.
///
/// The first `skip_rows` rows are discarded; rows narrower than the widest enabled column and
/// rows whose enabled cells are all blank are dropped.
pub struct RowReader<I> {
    rows: I,
    columns: ColumnsSection,
    width: usize,
    skip_rows: usize,
    stats: ReaderStats,
    failed: bool,
}

impl<I> RowReader<I>
where
    I: Iterator<Item = anyhow::Result<SheetRow>>,
{
    pub fn new(rows: I, columns: ColumnsSection, skip_rows: usize) -> Self {
        Self {
            rows,
            width: columns.required_width(),
            columns,
            skip_rows,
            stats: ReaderStats::default(),
            failed: false,
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    fn extract(&self, row: &SheetRow) -> Option<RawRow> {
        if row.cells.len() < self.width {
            return None;
        }
        let cell = |spec: ColumnSpec| -> String {
            if spec.enabled {
                row.cells[spec.index].clone()
            } else {
                String::new()
            }
        };
        Some(RawRow {
            row_number: row.number,
            source_doc_id: cell(self.columns.source_doc_id),
            source_text: cell(self.columns.source_text),
            target_doc_id: cell(self.columns.target_doc_id),
            target_text: cell(self.columns.target_text),
        })
    }
}

impl<I> Iterator for RowReader<I>
where
    I: Iterator<Item = anyhow::Result<SheetRow>>,
{
    type Item = anyhow::Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            };
            self.stats.rows_seen += 1;
            if self.stats.rows_seen <= self.skip_rows {
                self.stats.rows_skipped += 1;
                continue;
            }
            let Some(raw) = self.extract(&row) else {
                tracing::debug!(row = row.number, cells = row.cells.len(), "row too short, dropped");
                self.stats.rows_dropped_short += 1;
                continue;
            };
            let blank = self
                .columns
                .enabled()
                .all(|spec| row.cells[spec.index].trim().is_empty());
            if blank {
                tracing::debug!(row = row.number, "blank row dropped");
                self.stats.rows_dropped_blank += 1;
                continue;
            }
            self.stats.rows_yielded += 1;
            return Some(Ok(raw));
        }
    }
}

impl<I> std::iter::FusedIterator for RowReader<I> where I: Iterator<Item = anyhow::Result<SheetRow>> {}
