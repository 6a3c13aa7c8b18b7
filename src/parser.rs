use std::sync::LazyLock;

use regex::Regex;

use crate::messages::MessageDraft;

// [D/M/Y, H:M[:S]] Sender: Content, brackets optional.
static LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\[?\s*(?P<date>\d{1,2}/\d{1,2}/\d{2,4})(?:\s*,\s*|\s+)(?P<time>\d{1,2}:\d{1,2}(?::\d{1,2})?)\s*\]?\s*(?P<sender>[^:]+?)\s*:\s*(?P<content>.*)$",
    )
    .expect("hardcoded regex")
});

const SENDER_MARKUP: &[char] = &[
    '~', '*', '-', '>', '@', '#', '_', '\u{200e}', '\u{200f}', '\u{202f}', '\u{feff}',
];

const SYSTEM_KEYWORDS: &[&str] = &[
    "encrypted",
    "created",
    "added",
    "removed",
    "joined",
    "left",
    "changed",
];

const MIN_CONTENT_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub timestamp: String,
    pub sender: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoMatch,
    EmptySender,
    SystemAnnouncement,
    TooShort,
}

type Guard = fn(&MessageParser, &Candidate<'_>) -> Option<Rejection>;

// Evaluated in order; the first guard that fires rejects the line.
const GUARDS: [Guard; 3] = [reject_empty_sender, reject_system_announcement, reject_short_content];

fn reject_empty_sender(_: &MessageParser, candidate: &Candidate<'_>) -> Option<Rejection> {
    candidate.sender.is_empty().then_some(Rejection::EmptySender)
}

fn reject_system_announcement(
    parser: &MessageParser,
    candidate: &Candidate<'_>,
) -> Option<Rejection> {
    parser
        .is_system_announcement(candidate.sender, candidate.content)
        .then_some(Rejection::SystemAnnouncement)
}

fn reject_short_content(_: &MessageParser, candidate: &Candidate<'_>) -> Option<Rejection> {
    (candidate.content.chars().count() < MIN_CONTENT_CHARS).then_some(Rejection::TooShort)
}

/// Turns raw generator output into at most one message draft.
#[derive(Debug, Clone)]
pub struct MessageParser {
    system_sender: String,
}

impl MessageParser {
    pub fn new(system_sender: impl Into<String>) -> Self {
        MessageParser {
            system_sender: system_sender.into().trim().to_lowercase(),
        }
    }

    /// Structural match only, no validation.
    pub fn match_line(line: &str) -> Option<Candidate<'_>> {
        let caps = LINE.captures(line)?;
        let date = caps.name("date")?.as_str();
        let time = caps.name("time")?.as_str();
        let sender = caps
            .name("sender")?
            .as_str()
            .trim_start_matches(|c: char| c.is_whitespace() || SENDER_MARKUP.contains(&c))
            .trim_end();
        let content = caps.name("content")?.as_str().trim();

        Some(Candidate {
            timestamp: format!("{}, {}", date, time),
            sender,
            content,
        })
    }

    pub fn is_system_announcement(&self, sender: &str, content: &str) -> bool {
        if self.system_sender.is_empty()
            || !sender.to_lowercase().starts_with(&self.system_sender)
        {
            return false;
        }
        let content = content.to_lowercase();
        SYSTEM_KEYWORDS.iter().any(|keyword| content.contains(keyword))
    }

    pub fn check(&self, candidate: &Candidate<'_>) -> Result<(), Rejection> {
        match GUARDS.iter().find_map(|guard| guard(self, candidate)) {
            Some(rejection) => Err(rejection),
            None => Ok(()),
        }
    }

    pub fn evaluate_line(&self, line: &str) -> Result<MessageDraft, Rejection> {
        let candidate = Self::match_line(line).ok_or(Rejection::NoMatch)?;
        self.check(&candidate)?;
        Ok(MessageDraft::new(
            candidate.sender.to_string(),
            candidate.content.to_string(),
            candidate.timestamp,
        ))
    }

    /// Greedy first match: lines after the first accepted one are never inspected.
    pub fn extract_first_valid(&self, raw: &str) -> Option<MessageDraft> {
        raw.lines().find_map(|line| self.evaluate_line(line).ok())
    }
}
