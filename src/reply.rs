//! SMTP reply parsing (RFC 5321 §4.2).
//!
//! A reply is one or more lines `CCCsTEXT`, `CCC` three digits, `s` either
//! `-` (continuation) or space (final). Lines that don't match that shape
//! are skipped — tolerates stray banner junk — but only a well-formed line
//! can terminate the reply.

use nom::{
    character::complete::{digit1, one_of},
    combinator::{map_res, rest},
    sequence::tuple,
    IResult,
};

/// A parsed SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit status code, absent if the stream ended before any
    /// well-formed line was read.
    pub code: Option<u16>,
    /// Text of each line that contributed to the reply, in order.
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_positive(&self) -> bool {
        matches!(self.code, Some(c) if (200..300).contains(&c))
    }

    pub fn has_code(&self, code: u16) -> bool {
        self.code == Some(code)
    }

    /// First whitespace-delimited token of the first line, if any.
    pub fn first_word(&self) -> Option<&str> {
        self.lines.first().and_then(|l| l.split_whitespace().next())
    }
}

struct ParsedLine {
    code: u16,
    terminal: bool,
    text: String,
}

fn parse_line(input: &str) -> IResult<&str, ParsedLine> {
    let (rest_input, (code_str, sep, text)) = tuple((
        map_res(digit1, |s: &str| -> Result<&str, ()> {
            if s.len() == 3 {
                Ok(s)
            } else {
                Err(())
            }
        }),
        one_of("- "),
        rest,
    ))(input)?;
    let code: u16 = code_str.parse().map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    if !(200..=599).contains(&code) {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((
        rest_input,
        ParsedLine {
            code,
            terminal: sep == ' ',
            text: text.to_string(),
        },
    ))
}

/// Drives an externally-fed reply parser: callers push raw lines (CRLF/LF
/// already stripped) one at a time and ask whether more lines are needed.
#[derive(Debug, Default)]
pub struct ReplyParser {
    code: Option<u16>,
    lines: Vec<String>,
    done: bool,
}

impl ReplyParser {
    pub fn new() -> ReplyParser {
        ReplyParser::default()
    }

    /// Feeds one line. Returns `true` if the parser needs another line,
    /// `false` once the reply is terminated.
    pub fn feed(&mut self, line: &str) -> bool {
        if self.done {
            return false;
        }
        match parse_line(line) {
            Ok((_, parsed)) => {
                if self.code.is_none() {
                    self.code = Some(parsed.code);
                }
                self.lines.push(parsed.text);
                if parsed.terminal {
                    self.done = true;
                    return false;
                }
                true
            }
            Err(_) => {
                // malformed / unexpected banner junk — resilient, keep reading
                true
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_reply(self) -> Reply {
        Reply {
            code: self.code,
            lines: self.lines,
        }
    }
}

/// Renders a `Reply` back to the wire form a compliant server would send,
/// used only by tests to exercise the parser round-trip property.
#[cfg(test)]
pub fn render(reply: &Reply) -> String {
    let code = reply.code.unwrap_or(250);
    let mut out = String::new();
    for (i, line) in reply.lines.iter().enumerate() {
        let sep = if i + 1 == reply.lines.len() { ' ' } else { '-' };
        out.push_str(&format!("{code}{sep}{line}\r\n"));
    }
    if reply.lines.is_empty() {
        out.push_str(&format!("{code} \r\n"));
    }
    out
}
