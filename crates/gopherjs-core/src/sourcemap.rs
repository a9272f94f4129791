//! Source-map plumbing between generated code and the output file.
//!
//! Generated code carries inline position markers. [`SourceMapFilter`]
//! strips them on the way to the underlying writer and reports each one,
//! with the generated line and column it sits at, to a callback.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ast::Position;

const MARKER: u8 = 0x08;

/// Inline marker recording that the following generated code comes from
/// `pos`. Invalid positions produce a marker without original location.
pub fn position_marker(pos: &Position) -> String {
    format!(
        "{m}{}:{}:{}{m}",
        pos.line,
        pos.column,
        pos.filename,
        m = MARKER as char
    )
}

/// Original location of a generated position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// One generated position. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub original: Option<OriginalPosition>,
}

/// Removes position markers from the stream written through it.
pub struct SourceMapFilter<'a, W: Write> {
    writer: W,
    callback: Option<Box<dyn FnMut(Mapping) + 'a>>,
    line: u32,
    column: u32,
    marker: Option<Vec<u8>>,
}

impl<'a, W: Write> SourceMapFilter<'a, W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            callback: None,
            line: 1,
            column: 0,
            marker: None,
        }
    }

    pub fn with_callback(writer: W, callback: impl FnMut(Mapping) + 'a) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            ..Self::new(writer)
        }
    }

    fn emit(&mut self, raw: &[u8]) {
        let Some(callback) = self.callback.as_mut() else {
            return;
        };
        let text = String::from_utf8_lossy(raw);
        let mut parts = text.splitn(3, ':');
        let line = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
        let column = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
        let file = parts.next().unwrap_or_default();
        let original = (line > 0).then(|| OriginalPosition {
            file: file.to_string(),
            line,
            column,
        });
        callback(Mapping {
            generated_line: self.line,
            generated_column: self.column,
            original,
        });
    }
}

impl<W: Write> Write for SourceMapFilter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut start = 0;
        for (i, &b) in buf.iter().enumerate() {
            if let Some(marker) = self.marker.as_mut() {
                if b == MARKER {
                    let raw = std::mem::take(marker);
                    self.marker = None;
                    self.emit(&raw);
                    start = i + 1;
                } else {
                    marker.push(b);
                }
                continue;
            }
            if b == MARKER {
                self.writer.write_all(&buf[start..i])?;
                self.marker = Some(Vec::new());
                continue;
            }
            if b == b'\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        if self.marker.is_none() && start < buf.len() {
            self.writer.write_all(&buf[start..])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Version 3 source map document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u32,
    pub file: String,
    #[serde(rename = "sourceRoot", default, skip_serializing_if = "String::is_empty")]
    pub source_root: String,
    pub sources: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

/// Collects mappings in generated order and encodes them.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    file: String,
    mappings: Vec<Mapping>,
}

impl SourceMapBuilder {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            mappings: Vec::new(),
        }
    }

    pub fn add(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn build(&self) -> SourceMap {
        let mut sources: Vec<String> = Vec::new();
        let mut source_index: FxHashMap<&str, i64> = FxHashMap::default();
        let mut out = String::new();

        let mut line = 1;
        let mut first_in_line = true;
        let mut prev_column = 0i64;
        let mut prev_source = 0i64;
        let mut prev_orig_line = 0i64;
        let mut prev_orig_column = 0i64;

        for m in &self.mappings {
            while line < m.generated_line {
                out.push(';');
                line += 1;
                prev_column = 0;
                first_in_line = true;
            }
            if !first_in_line {
                out.push(',');
            }
            first_in_line = false;

            let column = i64::from(m.generated_column);
            encode_vlq(&mut out, column - prev_column);
            prev_column = column;

            if let Some(orig) = &m.original {
                let index = *source_index.entry(orig.file.as_str()).or_insert_with(|| {
                    sources.push(orig.file.clone());
                    sources.len() as i64 - 1
                });
                let orig_line = i64::from(orig.line) - 1;
                let orig_column = i64::from(orig.column.saturating_sub(1));
                encode_vlq(&mut out, index - prev_source);
                encode_vlq(&mut out, orig_line - prev_orig_line);
                encode_vlq(&mut out, orig_column - prev_orig_column);
                prev_source = index;
                prev_orig_line = orig_line;
                prev_orig_column = orig_column;
            }
        }

        SourceMap {
            version: 3,
            file: self.file.clone(),
            source_root: String::new(),
            sources,
            names: Vec::new(),
            mappings: out,
        }
    }
}

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn encode_vlq(out: &mut String, value: i64) {
    let mut v = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = (v & 0b1_1111) as usize;
        v >>= 5;
        if v > 0 {
            digit |= 0b10_0000;
        }
        out.push(BASE64[digit] as char);
        if v == 0 {
            break;
        }
    }
}

/// Rewrites original file names for publication in a source map.
#[derive(Debug, Clone)]
pub struct FileNameMapper {
    goroot: PathBuf,
    gopath: Vec<PathBuf>,
    local: bool,
}

impl FileNameMapper {
    pub fn new(goroot: &Path, gopath: &[PathBuf], local: bool) -> Self {
        Self {
            goroot: goroot.to_path_buf(),
            gopath: gopath.to_vec(),
            local,
        }
    }

    /// Local mapping keeps file names as they are. Otherwise files in a
    /// GOPATH workspace become `/<import path>/<file>`, files in GOROOT
    /// become `<import path>/<file>` and anything else its base name.
    pub fn map(&self, file: &str) -> String {
        if self.local {
            return file.to_string();
        }
        let path = Path::new(file);
        if let Some(rest) = self
            .gopath
            .iter()
            .find_map(|ws| path.strip_prefix(ws.join("src")).ok())
        {
            return format!("/{}", slash_path(rest));
        }
        if let Ok(rest) = path.strip_prefix(self.goroot.join("src")) {
            return slash_path(rest);
        }
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string())
    }

    pub fn map_mapping(&self, mut mapping: Mapping) -> Mapping {
        if let Some(orig) = mapping.original.as_mut() {
            orig.file = self.map(&orig.file);
        }
        mapping
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
