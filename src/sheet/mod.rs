//! Streaming access to the input spreadsheet.

mod delimited;
mod reader;
mod xlsx;

use std::path::Path;

use anyhow::bail;

use crate::config::FileStructureSection;

pub use delimited::{DelimitedRows, DelimitedSheet};
pub use reader::{ReaderStats, RowReader};
pub use xlsx::{column_index, SheetEntry, XlsxRows, XlsxWorkbook};

#[cfg(test)]
pub(crate) use xlsx::tests::build_xlsx;

/// One physical sheet row: its 1-based number and its cells, left-aligned by column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SheetRow {
    pub number: usize,
    pub cells: Vec<String>,
}

pub type SheetRows<'a> = Box<dyn Iterator<Item = anyhow::Result<SheetRow>> + 'a>;

pub enum Workbook {
    Xlsx(XlsxWorkbook),
    Delimited(DelimitedSheet),
}

impl Workbook {
    /// Opens by extension: `.xlsx`/`.xlsm`, `.csv`, `.tsv`/`.txt` (tab separated).
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" => Ok(Self::Xlsx(XlsxWorkbook::open(path)?)),
            "csv" => Ok(Self::Delimited(DelimitedSheet::open(path, b',')?)),
            "tsv" | "txt" => Ok(Self::Delimited(DelimitedSheet::open(path, b'\t')?)),
            "xls" => bail!(
                "legacy .xls workbooks are not supported; save as .xlsx: {}",
                path.display()
            ),
            _ => bail!("unsupported input type: {}", path.display()),
        }
    }

    /// Data rows of the configured sheet, after skipping and column mapping.
    pub fn rows(&mut self, layout: &FileStructureSection) -> anyhow::Result<RowReader<SheetRows<'_>>> {
        let rows: SheetRows<'_> = match self {
            Self::Xlsx(wb) => Box::new(wb.rows(layout.sheet.as_deref())?),
            Self::Delimited(sheet) => Box::new(sheet.rows()?),
        };
        Ok(RowReader::new(rows, layout.columns, layout.skip_rows))
    }
}
