//! Shared G-code line utilities: comments, line numbers, checksums, command codes.

/// A single command line split into its Marlin framing parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub line_number: Option<u32>,
    pub body: &'a str,
    pub checksum: Option<u8>,
    /// Everything in front of `*`; the checksum is computed over this.
    pub checked_text: &'a str,
}

impl CommandLine<'_> {
    pub fn is_blank(&self) -> bool {
        self.line_number.is_none() && self.body.is_empty()
    }

    pub fn checksum_matches(&self) -> bool {
        self.checksum == Some(checksum(self.checked_text))
    }
}

pub fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// XOR of every byte, as Marlin computes it.
pub fn checksum(text: &str) -> u8 {
    text.bytes().fold(0, |acc, b| acc ^ b)
}

/// Frame a command the way a host does when line numbering is on: `N<n> <body>*<checksum>`.
pub fn with_checksum(line_number: u32, body: &str) -> String {
    let numbered = format!("N{} {}", line_number, body.trim());
    let cs = checksum(&numbered);
    format!("{}*{}", numbered, cs)
}

pub fn parse_command_line(line: &str) -> CommandLine<'_> {
    let text = strip_comment(line).trim();
    let (checked_text, checksum) = match text.rfind('*') {
        Some(idx) => (&text[..idx], text[idx + 1..].trim().parse::<u8>().ok()),
        None => (text, None),
    };

    let mut line_number = None;
    let mut body = checked_text.trim();
    if let Some(rest) = body.strip_prefix(['N', 'n']) {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            line_number = rest[..digits].parse().ok();
            body = rest[digits..].trim();
        }
    }

    CommandLine { line_number, body, checksum, checked_text }
}

/// Normalized command code of a line body (`"g01 x1"` -> `"G1"`), if it is a G, M or T word.
pub fn command_code(body: &str) -> Option<String> {
    let word = body.split_whitespace().next()?;
    let mut chars = word.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if !matches!(letter, 'G' | 'M' | 'T') {
        return None;
    }
    let digits: String = chars.take_while(|c| c.is_ascii_digit()).collect();
    let number: u32 = digits.parse().ok()?;
    Some(format!("{}{}", letter, number))
}
