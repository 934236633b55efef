//! Checkbox scanning for the TODO list.

use std::sync::LazyLock;

use regex::Regex;

static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*- \[([ xX~!])\]").expect("checkbox regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoMark {
    Open,
    Done,
    /// `[~]` or `[!]`: parked, does not block completion.
    Deferred,
}

/// Recognize a checkbox marker at the start of a line.
pub fn parse_mark(line: &str) -> Option<TodoMark> {
    let caps = CHECKBOX_RE.captures(line)?;
    match caps.get(1)?.as_str() {
        " " => Some(TodoMark::Open),
        "x" | "X" => Some(TodoMark::Done),
        _ => Some(TodoMark::Deferred),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TodoSummary {
    pub open: usize,
    pub done: usize,
    pub deferred: usize,
}

impl TodoSummary {
    pub fn has_blocking(&self) -> bool {
        self.open > 0
    }
}

pub fn summarize(text: &str) -> TodoSummary {
    let mut summary = TodoSummary::default();
    for mark in text.lines().filter_map(parse_mark) {
        match mark {
            TodoMark::Open => summary.open += 1,
            TodoMark::Done => summary.done += 1,
            TodoMark::Deferred => summary.deferred += 1,
        }
    }
    summary
}
