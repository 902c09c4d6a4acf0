use std::path::{Path, PathBuf};

use anyhow::Context;

/// Writes prompt/response pairs to one file per row and attempt. Disabled by default.
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `row_{row:07}.{kind}.txt`, e.g. `row_0000042.prompt.txt`.
    pub fn write_row_text(&self, row: usize, kind: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self
            .dir
            .join(sanitize_filename(&format!("row_{row:07}.{kind}.txt")));
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_only_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let on = TraceWriter::new(dir.path().join("t"), true).expect("trace");
        on.write_row_text(42, "response:1", "[]").expect("write");
        let written = dir.path().join("t").join("row_0000042.response_1.txt");
        assert_eq!(std::fs::read_to_string(written).expect("read"), "[]");

        let off = TraceWriter::new(dir.path().join("off"), false).expect("trace");
        off.write_row_text(1, "prompt", "x").expect("noop");
        assert!(!dir.path().join("off").exists());
    }
}
