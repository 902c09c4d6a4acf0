use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use super::SheetRow;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub part_name: String,
}

/// An opened `.xlsx` container.
///
/// Only the workbook index and the shared-strings table are read eagerly; worksheet XML is
/// decompressed and parsed on demand, one row at a time.
pub struct XlsxWorkbook<R = BufReader<File>> {
    archive: ZipArchive<R>,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
}

impl XlsxWorkbook {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open xlsx: {}", path.display()))?;
        Self::from_reader(BufReader::new(f))
            .with_context(|| format!("read xlsx: {}", path.display()))
    }
}

impl<R: Read + Seek> XlsxWorkbook<R> {
    pub fn from_reader(reader: R) -> anyhow::Result<Self> {
        let mut archive = ZipArchive::new(reader).context("read zip")?;
        let sheets = read_sheet_index(&mut archive)?;
        if sheets.is_empty() {
            return Err(anyhow!("workbook has no sheets"));
        }
        let shared_strings = read_shared_strings(&mut archive)?;
        Ok(Self {
            archive,
            sheets,
            shared_strings,
        })
    }

    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    /// Streams the rows of `sheet` (by name), or of the first sheet when `None`.
    pub fn rows(&mut self, sheet: Option<&str>) -> anyhow::Result<XlsxRows<'_>> {
        let entry = match sheet {
            Some(name) => self
                .sheets
                .iter()
                .find(|s| s.name == name)
                .with_context(|| {
                    format!(
                        "sheet not found: {name} (available: {})",
                        self.sheets
                            .iter()
                            .map(|s| s.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                })?,
            None => &self.sheets[0],
        };
        let part_name = entry.part_name.clone();
        let file = self
            .archive
            .by_name(&part_name)
            .with_context(|| format!("worksheet part: {part_name}"))?;
        let source: Box<dyn BufRead + '_> = Box::new(BufReader::new(file));
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);
        Ok(XlsxRows {
            reader,
            shared_strings: &self.shared_strings,
            buf: Vec::new(),
            last_row: 0,
            next_row: 1,
            width: 0,
            pending: None,
            done: false,
        })
    }
}

/// Forward-only row stream over one worksheet part.
///
/// Rows absent from the XML (gaps in `r`) are yielded as empty rows so row numbers stay
/// aligned with the sheet. Excel omits trailing empty cells; rows are padded back to the width
/// declared by `<dimension>` or the row's `spans`.
pub struct XlsxRows<'a> {
    reader: Reader<Box<dyn BufRead + 'a>>,
    shared_strings: &'a [String],
    buf: Vec<u8>,
    last_row: usize,
    next_row: usize,
    width: usize,
    pending: Option<SheetRow>,
    done: bool,
}

impl Iterator for XlsxRows<'_> {
    type Item = anyhow::Result<SheetRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.take() {
                if self.next_row < row.number {
                    let number = self.next_row;
                    self.next_row += 1;
                    self.pending = Some(row);
                    return Some(Ok(SheetRow {
                        number,
                        cells: vec![String::new(); self.width],
                    }));
                }
                self.next_row = row.number + 1;
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            match self.read_row() {
                Ok(Some(row)) => self.pending = Some(row),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[derive(Default)]
struct CellCapture {
    column: usize,
    kind: Option<String>,
    value: String,
    in_value: bool,
    in_phonetic: bool,
}

impl XlsxRows<'_> {
    fn read_row(&mut self) -> anyhow::Result<Option<SheetRow>> {
        let mut row: Option<SheetRow> = None;
        let mut cell: Option<CellCapture> = None;
        let mut next_col = 0usize;
        loop {
            self.buf.clear();
            let ev = self
                .reader
                .read_event_into(&mut self.buf)
                .context("read worksheet xml")?;
            match ev {
                Event::Eof => return Ok(None),
                Event::Start(s) => match s.local_name().as_ref() {
                    b"row" => {
                        row = Some(start_row(&mut self.last_row, self.width, &s)?);
                        next_col = 0;
                    }
                    b"dimension" => self.width = self.width.max(dimension_width(&s)?),
                    b"c" => {
                        let column = cell_column(&s)?.unwrap_or(next_col);
                        next_col = column + 1;
                        cell = Some(CellCapture {
                            column,
                            kind: attr_value(&s, b"t")?,
                            ..CellCapture::default()
                        });
                    }
                    b"v" | b"t" => {
                        if let Some(c) = cell.as_mut() {
                            c.in_value = !c.in_phonetic;
                        }
                    }
                    b"rPh" => {
                        if let Some(c) = cell.as_mut() {
                            c.in_phonetic = true;
                        }
                    }
                    _ => {}
                },
                Event::Empty(s) => match s.local_name().as_ref() {
                    b"row" => {
                        return start_row(&mut self.last_row, self.width, &s).map(Some);
                    }
                    b"dimension" => self.width = self.width.max(dimension_width(&s)?),
                    b"c" => {
                        let column = cell_column(&s)?.unwrap_or(next_col);
                        next_col = column + 1;
                        if let Some(r) = row.as_mut() {
                            place_cell(&mut r.cells, column, String::new());
                        }
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(c) = cell.as_mut().filter(|c| c.in_value) {
                        c.value.push_str(&t.unescape().context("unescape cell text")?);
                    }
                }
                Event::CData(t) => {
                    if let Some(c) = cell.as_mut().filter(|c| c.in_value) {
                        c.value.push_str(&String::from_utf8_lossy(&t.into_inner()));
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" | b"t" => {
                        if let Some(c) = cell.as_mut() {
                            c.in_value = false;
                        }
                    }
                    b"rPh" => {
                        if let Some(c) = cell.as_mut() {
                            c.in_phonetic = false;
                        }
                    }
                    b"c" => {
                        if let Some(c) = cell.take() {
                            let text = resolve_cell(c.kind.as_deref(), c.value, self.shared_strings)?;
                            if let Some(r) = row.as_mut() {
                                place_cell(&mut r.cells, c.column, text);
                            }
                        }
                    }
                    b"row" => {
                        if let Some(r) = row.take() {
                            return Ok(Some(r));
                        }
                    }
                    b"sheetData" => return Ok(None),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

/// Opens a row with `width` empty cells, widened by its `spans` hint.
fn start_row(last_row: &mut usize, width: usize, s: &BytesStart<'_>) -> anyhow::Result<SheetRow> {
    let number = match attr_value(s, b"r")? {
        Some(r) => r
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid row number: {r}"))?,
        None => *last_row + 1,
    };
    if number <= *last_row {
        return Err(anyhow!("worksheet rows out of order: {number} after {last_row}"));
    }
    *last_row = number;
    let spans = attr_value(s, b"spans")?
        .map(|v| spans_width(&v))
        .unwrap_or(0);
    Ok(SheetRow {
        number,
        cells: vec![String::new(); width.max(spans)],
    })
}

/// `A1:D120` -> 4. A single-cell or missing reference gives 0.
fn dimension_width(s: &BytesStart<'_>) -> anyhow::Result<usize> {
    let Some(range) = attr_value(s, b"ref")? else {
        return Ok(0);
    };
    Ok(range
        .split(':')
        .nth(1)
        .and_then(column_index)
        .map_or(0, |c| c + 1))
}

/// `1:4` -> 4; `1:2 5:9` -> 9. Unparsable spans are ignored.
fn spans_width(spans: &str) -> usize {
    spans
        .split_whitespace()
        .filter_map(|span| span.rsplit(':').next()?.trim().parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

fn place_cell(cells: &mut Vec<String>, column: usize, text: String) {
    if cells.len() <= column {
        cells.resize(column + 1, String::new());
    }
    cells[column] = text;
}

fn resolve_cell(kind: Option<&str>, value: String, shared: &[String]) -> anyhow::Result<String> {
    match kind {
        Some("s") => {
            let idx = value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid shared string index: {value}"))?;
            shared
                .get(idx)
                .cloned()
                .with_context(|| format!("shared string index out of range: {idx}"))
        }
        Some("b") => Ok(match value.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        }),
        _ => Ok(value),
    }
}

fn cell_column(s: &BytesStart<'_>) -> anyhow::Result<Option<usize>> {
    match attr_value(s, b"r")? {
        Some(r) => column_index(&r)
            .map(Some)
            .with_context(|| format!("invalid cell reference: {r}")),
        None => Ok(None),
    }
}

/// `A1` -> 0, `B7` -> 1, `AA3` -> 26.
pub fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<char> = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let n = letters.iter().fold(0usize, |acc, c| {
        acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)
    });
    Some(n - 1)
}

fn attr_value(s: &BytesStart<'_>, local: &[u8]) -> anyhow::Result<Option<String>> {
    for a in s.attributes() {
        let a = a.context("attr")?;
        if a.key.local_name().as_ref() == local {
            let v = a.unescape_value().context("attr value")?;
            return Ok(Some(v.into_owned()));
        }
    }
    Ok(None)
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> anyhow::Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("zip entry: {name}")),
    };
    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)
        .with_context(|| format!("read zip entry: {name}"))?;
    Ok(Some(data))
}

/// Sheet names in workbook order with their worksheet part paths.
fn read_sheet_index<R: Read + Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<Vec<SheetEntry>> {
    let workbook = read_part(archive, WORKBOOK_PART)?
        .with_context(|| format!("missing {WORKBOOK_PART}; not an xlsx workbook"))?;
    let rels = read_part(archive, WORKBOOK_RELS_PART)?;

    let mut targets: Vec<(String, String)> = Vec::new();
    if let Some(rels) = rels {
        let mut reader = Reader::from_reader(rels.as_slice());
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf).context("read workbook rels")? {
                Event::Eof => break,
                Event::Start(s) | Event::Empty(s) if s.local_name().as_ref() == b"Relationship" => {
                    if let (Some(id), Some(target)) = (attr_value(&s, b"Id")?, attr_value(&s, b"Target")?) {
                        targets.push((id, resolve_target(&target)));
                    }
                }
                _ => {}
            }
        }
    }

    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read workbook xml")? {
            Event::Eof => break,
            Event::Start(s) | Event::Empty(s) if s.local_name().as_ref() == b"sheet" => {
                let name = attr_value(&s, b"name")?.unwrap_or_default();
                let rel_id = attr_value(&s, b"id")?;
                let part_name = rel_id
                    .and_then(|id| targets.iter().find(|(k, _)| *k == id).map(|(_, t)| t.clone()))
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", sheets.len() + 1));
                sheets.push(SheetEntry { name, part_name });
            }
            _ => {}
        }
    }
    Ok(sheets)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn read_shared_strings<R: Read + Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<Vec<String>> {
    let file = match archive.by_name(SHARED_STRINGS_PART) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e).context("zip entry: sharedStrings"),
    };
    let mut reader = Reader::from_reader(BufReader::new(file));
    reader.config_mut().trim_text(false);

    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read shared strings")? {
            Event::Eof => break,
            Event::Start(s) => match s.local_name().as_ref() {
                b"si" => cur.clear(),
                b"t" => in_text = !in_phonetic,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(s) if s.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_text => {
                cur.push_str(&t.unescape().context("unescape shared string")?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => out.push(std::mem::take(&mut cur)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    /// Builds a minimal workbook whose first sheet holds `rows`; every cell is a shared string.
    /// Empty cells are left out and `<dimension>` covers the widest row, as Excel writes them.
    pub(crate) fn build_xlsx(rows: &[Vec<&str>]) -> Vec<u8> {
        let col = |j: usize| (b'A' + j as u8) as char;
        let mut strings: Vec<String> = Vec::new();
        let mut sheet = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        );
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        if width > 0 {
            sheet.push_str(&format!(r#"<dimension ref="A1:{}{}"/>"#, col(width - 1), rows.len()));
        }
        sheet.push_str("<sheetData>");
        for (i, row) in rows.iter().enumerate() {
            sheet.push_str(&format!(r#"<row r="{}">"#, i + 1));
            for (j, cell) in row.iter().enumerate().filter(|(_, c)| !c.is_empty()) {
                sheet.push_str(&format!(
                    r#"<c r="{}{}" t="s"><v>{}</v></c>"#,
                    col(j),
                    i + 1,
                    strings.len()
                ));
                strings.push(escape(cell));
            }
            sheet.push_str("</row>");
        }
        sheet.push_str("</sheetData></worksheet>");

        let mut sst = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        );
        for s in &strings {
            sst.push_str(&format!(r#"<si><t xml:space="preserve">{s}</t></si>"#));
        }
        sst.push_str("</sst>");

        package(&[
            ("xl/workbook.xml", WORKBOOK_XML.to_string()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
            ("xl/worksheets/sheet1.xml", sheet),
            ("xl/sharedStrings.xml", sst),
        ])
    }

    pub(crate) fn package(parts: &[(&str, String)]) -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        for (name, body) in parts {
            zout.start_file(*name, opts).expect("start file");
            zout.write_all(body.as_bytes()).expect("write");
        }
        zout.finish().expect("finish").into_inner()
    }

    fn escape(s: &str) -> String {
        s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    }

    const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Corpus" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

    fn collect(bytes: Vec<u8>) -> Vec<SheetRow> {
        let mut wb = XlsxWorkbook::from_reader(Cursor::new(bytes)).expect("open");
        wb.rows(None)
            .expect("rows")
            .collect::<anyhow::Result<Vec<_>>>()
            .expect("read rows")
    }

    #[test]
    fn reads_shared_string_rows_in_order() {
        let rows = collect(build_xlsx(&[
            vec!["id", "english", "chinese"],
            vec!["A/1", "<s>The Council met.</s>", "安理会举行了会议。"],
        ]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].number, 2);
        assert_eq!(
            rows[1].cells,
            vec!["A/1", "<s>The Council met.</s>", "安理会举行了会议。"]
        );
    }

    #[test]
    fn handles_inline_numbers_gaps_and_rich_text() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>head</t></is></c></row>
<row r="4"><c r="A4"><v>42</v></c><c r="C4" t="s"><v>0</v></c><c r="D4" t="b"><v>1</v></c></row>
<row r="5"/>
</sheetData></worksheet>"#;
        let sst = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><si><r><t>Rich </t></r><r><t>text.</t></r><rPh><t>ignored</t></rPh></si></sst>"#;
        let bytes = package(&[
            ("xl/workbook.xml", WORKBOOK_XML.to_string()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
            ("xl/worksheets/sheet1.xml", sheet.to_string()),
            ("xl/sharedStrings.xml", sst.to_string()),
        ]);
        let rows = collect(bytes);
        let numbers: Vec<usize> = rows.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(rows[0].cells, vec!["head"]);
        assert!(rows[1].cells.is_empty());
        assert_eq!(rows[3].cells, vec!["42", "", "Rich text.", "TRUE"]);
        assert!(rows[4].cells.is_empty());
    }

    #[test]
    fn rows_are_padded_to_the_sheet_dimension() {
        let rows = collect(build_xlsx(&[
            vec!["id", "en", "", "zh"],
            vec!["A/1", "The Council met."],
            vec![],
            vec!["A/3", "", "", "休会。"],
        ]));
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].cells, vec!["id", "en", "", "zh"]);
        assert_eq!(rows[1].cells, vec!["A/1", "The Council met.", "", ""]);
        assert_eq!(rows[2].cells, vec![""; 4]);
        assert_eq!(rows[3].cells, vec!["A/3", "", "", "休会。"]);
    }

    #[test]
    fn row_spans_widen_rows_without_a_dimension() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1" spans="1:4"><c r="A1" t="inlineStr"><is><t>A/1</t></is></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>A/2</t></is></c></row>
</sheetData></worksheet>"#;
        let rows = collect(package(&[
            ("xl/workbook.xml", WORKBOOK_XML.to_string()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
            ("xl/worksheets/sheet1.xml", sheet.to_string()),
        ]));
        assert_eq!(rows[0].cells, vec!["A/1", "", "", ""]);
        assert_eq!(rows[1].cells, vec!["A/2"]);
        assert_eq!(spans_width("1:2 5:9"), 9);
        assert_eq!(spans_width("bogus"), 0);
    }

    #[test]
    fn selects_sheet_by_name() {
        let mut wb = XlsxWorkbook::from_reader(Cursor::new(build_xlsx(&[vec!["x"]]))).expect("open");
        assert_eq!(wb.sheets()[0].name, "Corpus");
        assert!(wb.rows(Some("Corpus")).is_ok());
        assert!(wb.rows(Some("Missing")).is_err());
    }

    #[test]
    fn corrupt_container_fails_at_open() {
        assert!(XlsxWorkbook::from_reader(Cursor::new(b"not a zip".to_vec())).is_err());
    }

    #[test]
    fn column_index_parses_references() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("b7"), Some(1));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
    }
}
