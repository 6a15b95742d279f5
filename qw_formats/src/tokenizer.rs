/// Characters that always form a token of their own outside quotes.
pub const SINGLE_CHARS: &[char] = &['{', '}', '(', ')', '\'', ':'];

/// Splits entity text into the tokens the map loader consumes.
///
/// Tokens are whitespace separated words, double-quoted strings (quotes are
/// stripped, no escape processing), or one of the single-character tokens in
/// [`SINGLE_CHARS`]. `//` starts a comment that runs to the end of the line.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a str) -> Self {
        Tokenizer { rest: text }
    }

    /// Text that has not been consumed yet.
    pub fn remaining(&self) -> &'a str {
        self.rest
    }

    pub fn next_token(&mut self) -> Option<&'a str> {
        self.skip_blank();
        let text = self.rest;
        let first = text.chars().next()?;

        if first == '"' {
            let body = &text[1..];
            return match body.find('"') {
                Some(end) => {
                    self.rest = &body[end + 1..];
                    Some(&body[..end])
                }
                None => {
                    self.rest = "";
                    Some(body)
                }
            };
        }

        if SINGLE_CHARS.contains(&first) {
            self.rest = &text[1..];
            return Some(&text[..1]);
        }

        let end = text
            .char_indices()
            .find(|&(_, c)| c.is_whitespace() || c == '"' || SINGLE_CHARS.contains(&c))
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        self.rest = &text[end..];
        Some(&text[..end])
    }

    fn skip_blank(&mut self) {
        loop {
            let trimmed = self.rest.trim_start();
            if let Some(comment) = trimmed.strip_prefix("//") {
                self.rest = match comment.find('\n') {
                    Some(newline) => &comment[newline + 1..],
                    None => "",
                };
                continue;
            }
            self.rest = trimmed;
            return;
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}
