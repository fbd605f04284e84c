//! Memory tags in responses
//!
//! Responses may carry `[REMEMBER: ...]`, `[GOAL: ...]` and `[DONE: ...]`
//! tags. They are stripped before delivery and kept in a small bounded log
//! that is fed back into later prompts.

use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(REMEMBER|GOAL|DONE):\s*([^\]]*?)\s*\]").expect("memory tag pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Remember,
    Goal,
    Done,
}

impl MemoryKind {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "REMEMBER" => Some(Self::Remember),
            "GOAL" => Some(Self::Goal),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Remember => "REMEMBER",
            Self::Goal => "GOAL",
            Self::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryIntent {
    pub kind: MemoryKind,
    pub content: String,
}

impl fmt::Display for MemoryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.tag(), self.content)
    }
}

/// Response text with tags removed, plus the tags found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub text: String,
    pub intents: Vec<MemoryIntent>,
}

/// Extract memory tags and return the cleaned text
pub fn process(response: &str) -> Processed {
    let mut intents = Vec::new();
    for caps in TAG_RE.captures_iter(response) {
        let content = caps[2].trim();
        if content.is_empty() {
            continue;
        }
        if let Some(kind) = MemoryKind::parse(&caps[1]) {
            intents.push(MemoryIntent {
                kind,
                content: content.to_string(),
            });
        }
    }

    if intents.is_empty() && !TAG_RE.is_match(response) {
        return Processed {
            text: response.trim().to_string(),
            intents,
        };
    }

    let stripped = TAG_RE.replace_all(response, "");
    debug!(intents = intents.len(), "process: stripped memory tags");
    Processed {
        text: collapse_blank_lines(&stripped),
        intents,
    }
}

/// Trim line ends and squeeze runs of blank lines down to one
fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() && out.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Bounded log of remembered intents, oldest evicted first
#[derive(Debug, Clone)]
pub struct MemoryLog {
    capacity: usize,
    entries: VecDeque<MemoryIntent>,
}

impl MemoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record an intent; `DONE` also drops the matching `GOAL`
    pub fn record(&mut self, intent: MemoryIntent) {
        if self.capacity == 0 {
            return;
        }
        if intent.kind == MemoryKind::Done {
            self.entries
                .retain(|e| !(e.kind == MemoryKind::Goal && e.content.eq_ignore_ascii_case(&intent.content)));
        }
        self.entries.retain(|e| e != &intent);
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(intent);
    }

    /// Lines for the prompt, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
