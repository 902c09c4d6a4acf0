use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::ir::{Finding, InvalidPair, ValidPair};

pub const RESULT_HEADER: [&str; 7] = [
    "source_doc_id",
    "source_sentence",
    "target_doc_id",
    "target_sentence",
    "identified_structure",
    "structure_type",
    "translation_technique",
];

pub const INVALID_HEADER: [&str; 5] = [
    "source_doc_id",
    "target_doc_id",
    "reason",
    "source_text",
    "target_text",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// `out/report.csv` -> `out/report_invalid.csv`.
pub fn invalid_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output.with_file_name(format!("{stem}_invalid.csv"))
}

/// Opens `path` for appending; a new or empty file first gets a BOM and `header`.
fn open_append(path: &Path, header: &[&str]) -> anyhow::Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open output: {}", path.display()))?;
    let fresh = file
        .metadata()
        .with_context(|| format!("stat output: {}", path.display()))?
        .len()
        == 0;
    if fresh {
        file.write_all(UTF8_BOM)
            .with_context(|| format!("write output: {}", path.display()))?;
    }
    let mut w = csv::WriterBuilder::new().from_writer(file);
    if fresh {
        w.write_record(header)
            .with_context(|| format!("write header: {}", path.display()))?;
    }
    Ok(w)
}

pub struct ResultWriter {
    path: PathBuf,
    inner: csv::Writer<File>,
    rows: usize,
}

impl ResultWriter {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            inner: open_append(path, &RESULT_HEADER)?,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written by this writer (the header and earlier runs excluded).
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write(&mut self, pair: &ValidPair, finding: &Finding) -> anyhow::Result<()> {
        self.inner
            .write_record([
                pair.source_doc_id.as_str(),
                pair.source_sentence.as_str(),
                pair.target_doc_id.as_str(),
                pair.target_sentence.as_str(),
                finding.structure.as_str(),
                finding.structure_type.as_str(),
                finding.technique.as_str(),
            ])
            .with_context(|| format!("write result row: {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.inner
            .flush()
            .with_context(|| format!("flush: {}", self.path.display()))
    }
}

pub struct InvalidWriter {
    path: PathBuf,
    inner: csv::Writer<File>,
    rows: usize,
}

impl InvalidWriter {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            inner: open_append(path, &INVALID_HEADER)?,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write(&mut self, invalid: &InvalidPair) -> anyhow::Result<()> {
        let reason = invalid.reason.to_string();
        let p = &invalid.pair;
        self.inner
            .write_record([
                p.source_doc_id.as_str(),
                p.target_doc_id.as_str(),
                reason.as_str(),
                p.source_sentence.as_str(),
                p.target_sentence.as_str(),
            ])
            .with_context(|| format!("write invalid row: {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_all<'a>(&mut self, rows: impl IntoIterator<Item = &'a InvalidPair>) -> anyhow::Result<()> {
        for r in rows {
            self.write(r)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.inner
            .flush()
            .with_context(|| format!("flush: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Rejection;

    fn pair() -> ValidPair {
        ValidPair {
            row_number: 3,
            source_doc_id: "A/1".to_string(),
            target_doc_id: String::new(),
            source_sentence: "Hello, \"world\".".to_string(),
            target_sentence: "你好世界。".to_string(),
        }
    }

    #[test]
    fn invalid_path_sits_next_to_output() {
        assert_eq!(
            invalid_path_for(Path::new("out/report.csv")),
            PathBuf::from("out/report_invalid.csv")
        );
    }

    #[test]
    fn header_and_bom_are_written_once_across_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("results.csv");
        for _ in 0..2 {
            let mut w = ResultWriter::open(&path).expect("open");
            w.write(&pair(), &Finding::placeholder()).expect("write");
            w.flush().expect("flush");
            assert_eq!(w.rows(), 1);
        }
        let bytes = std::fs::read(&path).expect("read");
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RESULT_HEADER.join(","));
        assert_eq!(
            lines[1],
            "A/1,\"Hello, \"\"world\"\".\",,你好世界。,AI_NO_RESULT_OR_ERROR,N/A,N/A"
        );
        assert_eq!(text.matches("source_doc_id").count(), 1);
    }

    #[test]
    fn invalid_rows_carry_the_reason() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x_invalid.csv");
        let mut w = InvalidWriter::open(&path).expect("open");
        let bad = InvalidPair {
            pair: pair(),
            reason: Rejection::IncompleteSentence,
        };
        w.write_all([&bad]).expect("write");
        w.flush().expect("flush");

        let mut rdr = csv::ReaderBuilder::new()
            .from_path(&path)
            .expect("reader");
        let rec = rdr.records().next().expect("row").expect("record");
        assert_eq!(&rec[0], "A/1");
        assert_eq!(&rec[2], "source sentence does not end with terminal punctuation");
        assert_eq!(&rec[4], "你好世界。");
    }
}
