// Script position tables
//
// The host supplies, once per script, the original source text and a table
// mapping instruction-site ids to source ranges. Function literals use it to
// recover their original (uninstrumented) text.
//
// Positions are 1-based. The end column points one past the last character,
// so `function f(){}` on line 1 spans (1, 1, 1, 15).

use crate::value::Iid;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Source range of one instruction site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct SourcePosition {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl From<[u32; 4]> for SourcePosition {
    fn from(raw: [u32; 4]) -> Self {
        Self {
            start_line: raw[0],
            start_col: raw[1],
            end_line: raw[2],
            end_col: raw[3],
        }
    }
}

impl From<SourcePosition> for [u32; 4] {
    fn from(pos: SourcePosition) -> Self {
        [pos.start_line, pos.start_col, pos.end_line, pos.end_col]
    }
}

/// Original source and position table of one script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSource {
    /// Original source code
    pub code: String,

    /// Instruction site → source range
    #[serde(default)]
    pub positions: HashMap<Iid, SourcePosition>,
}

impl ScriptSource {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            positions: HashMap::new(),
        }
    }

    pub fn with_position(mut self, iid: Iid, position: [u32; 4]) -> Self {
        self.positions.insert(iid, position.into());
        self
    }

    /// Load a script table from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            bail!("Script table not found: {}", path_ref.display());
        }

        let contents = fs::read_to_string(path_ref).context("Failed to read script table")?;
        serde_json::from_str(&contents).context("Invalid script table JSON")
    }

    /// Original text of the instruction site `iid`
    ///
    /// Returns `None` when the site has no recorded position or the position
    /// does not fit the source.
    pub fn text_at(&self, iid: Iid) -> Option<String> {
        let position = self.positions.get(&iid)?;
        slice_source(&self.code, position)
    }
}

/// Cut the text covered by `position` out of `code`
///
/// Columns count characters, not bytes. Out-of-range coordinates yield
/// `None` rather than a partial slice.
pub fn slice_source(code: &str, position: &SourcePosition) -> Option<String> {
    let start_line = position.start_line.checked_sub(1)? as usize;
    let start_col = position.start_col.checked_sub(1)? as usize;
    let end_line = position.end_line.checked_sub(1)? as usize;
    let end_col = position.end_col.checked_sub(1)? as usize;

    if end_line < start_line || (end_line == start_line && end_col < start_col) {
        return None;
    }

    let lines: Vec<&str> = code.split('\n').collect();
    let first = lines.get(start_line)?;

    if start_line == end_line {
        return char_range(first, start_col, Some(end_col));
    }

    let last = lines.get(end_line)?;
    let mut text = char_range(first, start_col, None)?;
    for line in &lines[start_line + 1..end_line] {
        text.push('\n');
        text.push_str(line);
    }
    text.push('\n');
    text.push_str(&char_range(last, 0, Some(end_col))?);
    Some(text)
}

fn char_range(line: &str, start: usize, end: Option<usize>) -> Option<String> {
    let len = line.chars().count();
    let end = end.unwrap_or(len);
    if start > len || end > len {
        return None;
    }
    Some(line.chars().skip(start).take(end - start).collect())
}

/// Position tables of every script seen in a session
#[derive(Debug, Default)]
pub struct ScriptTable {
    scripts: HashMap<String, ScriptSource>,
    active: Vec<String>,
}

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the table for script `sid`
    pub fn register(&mut self, sid: impl Into<String>, script: ScriptSource) {
        self.scripts.insert(sid.into(), script);
    }

    pub fn enter(&mut self, sid: impl Into<String>) {
        self.active.push(sid.into());
    }

    pub fn exit(&mut self) -> Option<String> {
        self.active.pop()
    }

    /// Script currently executing, if any
    pub fn current(&self) -> Option<&ScriptSource> {
        self.active.last().and_then(|sid| self.scripts.get(sid))
    }

    pub fn get(&self, sid: &str) -> Option<&ScriptSource> {
        self.scripts.get(sid)
    }

    /// Original text of `iid` in the currently executing script
    pub fn text_at(&self, iid: Iid) -> Option<String> {
        self.current()?.text_at(iid)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
