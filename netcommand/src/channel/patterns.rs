//! Prompt patterns, scripted answers and output normalization.

use std::fmt;

use regex::bytes::Regex;

/// A scripted reply to a question the device may ask mid-command.
///
/// ```rust
/// use netcommand::channel::Answer;
///
/// let confirm = Answer::new(r"Proceed with reload\? \[confirm\]", "").unwrap();
/// assert!(confirm.matches(b"Proceed with reload? [confirm]"));
/// ```
#[derive(Clone)]
pub struct Answer {
    /// Pattern that identifies the question.
    pub pattern: Regex,

    /// Text sent back (a newline is appended).
    pub reply: String,

    /// Whether the reply must be kept out of logs.
    pub hidden: bool,
}

impl Answer {
    /// Create an answer, returning an error if the pattern is invalid.
    pub fn new(pattern: &str, reply: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            reply: reply.into(),
            hidden: false,
        })
    }

    /// Create an answer whose reply is a secret.
    pub fn hidden(pattern: &str, reply: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            hidden: true,
            ..Self::new(pattern, reply)?
        })
    }

    /// Check whether the question appears in `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.pattern.is_match(data)
    }

    /// Reply as it may appear in logs.
    pub fn display_reply(&self) -> &str {
        if self.hidden { "********" } else { &self.reply }
    }
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Answer")
            .field("pattern", &self.pattern.as_str())
            .field("reply", &self.display_reply())
            .finish()
    }
}

/// Compile a prompt pattern string into a regex.
///
/// Anchors to end of input unless the pattern already ends with `$`.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("{}\\s*$", pattern)
    };

    Regex::new(&pattern)
}

/// Strip the command echo from the start and the prompt line from the end
/// of raw shell output.
pub fn normalize_output(raw: &str, command: &str) -> String {
    let output = raw.trim_start_matches(['\r', '\n']);
    let output = output
        .strip_prefix(command)
        .unwrap_or(output)
        .trim_start_matches(['\r', '\n']);

    let trimmed = match memchr::memrchr(b'\n', output.as_bytes()) {
        Some(pos) => &output[..pos],
        None => "",
    };
    trimmed.trim_end_matches(['\r', '\n']).replace("\r\n", "\n")
}
