//! Minimal STAR table support.
//!
//! Covers the subset RELION job files use: named `data_` blocks holding
//! either a `loop_` table or bare name-value pairs. Blocks are read by name
//! and columns by tag; unrecognized columns are carried along but ignored.
//! Errors are typed so callers can tell a missing file from a missing block
//! from a malformed row.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StarError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("data block 'data_{0}' not found")]
    BlockNotFound(String),
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("data block has no row {0}")]
    MissingRow(usize),
    #[error("malformed STAR data at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("bad value '{value}' for {tag}: {reason}")]
    Value {
        tag: String,
        value: String,
        reason: String,
    },
}

/// One data block: column tags plus rows of whitespace-separated values.
/// A name-value block is exposed as a single row.
#[derive(Debug, Clone)]
pub struct StarTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl StarTable {
    /// Empty table with the given column tags, for writing.
    pub fn with_columns(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; the caller formats values (they are written verbatim).
    pub fn add_row(&mut self, values: &[&str]) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(values.iter().map(|v| v.to_string()).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read the named block from a STAR file.
    pub fn read(path: &Path, block: &str) -> Result<Self, StarError> {
        let text = fs::read_to_string(path).map_err(|source| StarError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, block)
    }

    /// Parse the named block out of STAR text.
    pub fn parse(text: &str, block: &str) -> Result<Self, StarError> {
        let header = format!("data_{block}");
        let lines: Vec<&str> = text.lines().collect();

        let mut i = match lines.iter().position(|l| l.trim() == header) {
            Some(i) => i + 1,
            None => return Err(StarError::BlockNotFound(block.to_string())),
        };

        // Skip blanks and comments up to the block body.
        while i < lines.len() {
            let t = lines[i].trim();
            if t.is_empty() || t.starts_with('#') {
                i += 1;
            } else {
                break;
            }
        }

        if i < lines.len() && lines[i].trim() == "loop_" {
            Self::parse_loop(&lines, i + 1)
        } else {
            Self::parse_pairs(&lines, i)
        }
    }

    fn parse_loop(lines: &[&str], mut i: usize) -> Result<Self, StarError> {
        let mut columns = Vec::new();
        while i < lines.len() {
            let t = lines[i].trim();
            if let Some(tag) = t.strip_prefix('_') {
                // Tags may carry a position suffix: `_rlnCoordinateX #1`.
                let tag = tag.split_whitespace().next().unwrap_or("");
                if tag.is_empty() {
                    return Err(StarError::Malformed {
                        line: i + 1,
                        reason: "empty column tag".into(),
                    });
                }
                columns.push(tag.to_string());
                i += 1;
            } else {
                break;
            }
        }
        if columns.is_empty() {
            return Err(StarError::Malformed {
                line: i + 1,
                reason: "loop_ without column tags".into(),
            });
        }

        let mut rows = Vec::new();
        while i < lines.len() {
            let t = lines[i].trim();
            // A blank line or the next block ends the loop data.
            if t.is_empty() || t.starts_with("data_") {
                break;
            }
            if t.starts_with('#') {
                i += 1;
                continue;
            }
            let fields: Vec<String> = t.split_whitespace().map(|f| f.to_string()).collect();
            if fields.len() != columns.len() {
                return Err(StarError::Malformed {
                    line: i + 1,
                    reason: format!("expected {} fields, found {}", columns.len(), fields.len()),
                });
            }
            rows.push(fields);
            i += 1;
        }

        Ok(Self { columns, rows })
    }

    fn parse_pairs(lines: &[&str], mut i: usize) -> Result<Self, StarError> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        while i < lines.len() {
            let t = lines[i].trim();
            if t.starts_with("data_") || t == "loop_" {
                break;
            }
            if t.is_empty() || t.starts_with('#') {
                i += 1;
                continue;
            }
            let tag = match t.strip_prefix('_') {
                Some(rest) => rest,
                None => {
                    return Err(StarError::Malformed {
                        line: i + 1,
                        reason: format!("expected '_tag value', found '{t}'"),
                    })
                }
            };
            match tag.split_once(char::is_whitespace) {
                Some((name, value)) => {
                    columns.push(name.to_string());
                    values.push(value.trim().to_string());
                }
                None => {
                    return Err(StarError::Malformed {
                        line: i + 1,
                        reason: format!("tag '_{tag}' has no value"),
                    })
                }
            }
            i += 1;
        }
        if columns.is_empty() {
            return Err(StarError::Malformed {
                line: i + 1,
                reason: "empty data block".into(),
            });
        }
        Ok(Self {
            columns,
            rows: vec![values],
        })
    }

    fn column_index(&self, tag: &str) -> Result<usize, StarError> {
        self.columns
            .iter()
            .position(|c| c == tag)
            .ok_or_else(|| StarError::ColumnNotFound(tag.to_string()))
    }

    /// Value at (row, tag).
    pub fn get(&self, row: usize, tag: &str) -> Result<&str, StarError> {
        let col = self.column_index(tag)?;
        let r = self.rows.get(row).ok_or(StarError::MissingRow(row))?;
        Ok(&r[col])
    }

    /// All values of one column, in row order.
    pub fn column(&self, tag: &str) -> Result<Vec<&str>, StarError> {
        let col = self.column_index(tag)?;
        Ok(self.rows.iter().map(|r| r[col].as_str()).collect())
    }

    pub fn parse_f64(&self, row: usize, tag: &str) -> Result<f64, StarError> {
        let v = self.get(row, tag)?;
        v.parse().map_err(|e: std::num::ParseFloatError| StarError::Value {
            tag: tag.to_string(),
            value: v.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn parse_i64(&self, row: usize, tag: &str) -> Result<i64, StarError> {
        let v = self.get(row, tag)?;
        v.parse().map_err(|e: std::num::ParseIntError| StarError::Value {
            tag: tag.to_string(),
            value: v.to_string(),
            reason: e.to_string(),
        })
    }

    /// Write as a `loop_` block. RELION tolerates any column widths, so rows
    /// are single-space separated.
    pub fn write_loop(&self, w: &mut dyn Write, block: &str) -> io::Result<()> {
        writeln!(w, "\n# version 30001\n")?;
        writeln!(w, "data_{block}\n")?;
        writeln!(w, "loop_")?;
        for (i, tag) in self.columns.iter().enumerate() {
            writeln!(w, "_{tag} #{}", i + 1)?;
        }
        for row in &self.rows {
            writeln!(w, "{}", row.join(" "))?;
        }
        writeln!(w)
    }

    /// Write the first row as a name-value block (RELION "single row" style).
    pub fn write_pairs(&self, w: &mut dyn Write, block: &str) -> io::Result<()> {
        writeln!(w, "\n# version 30001\n")?;
        writeln!(w, "data_{block}\n")?;
        let row = self.rows.first().map(Vec::as_slice).unwrap_or(&[]);
        for (tag, value) in self.columns.iter().zip(row) {
            writeln!(w, "_{tag} {value}")?;
        }
        writeln!(w)
    }

    /// Write a single `loop_` block as the whole file.
    pub fn write_file(&self, path: &Path, block: &str) -> io::Result<()> {
        let mut f = File::create(path)?;
        self.write_loop(&mut f, block)
    }
}
