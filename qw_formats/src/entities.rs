use serde::Serialize;
use thiserror::Error;

use crate::tokenizer::Tokenizer;

/// Malformed entity text. Every variant aborts the map load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityTextError {
    #[error("EOF without closing brace")]
    UnexpectedEof,
    #[error("closing brace without data for key '{key}'")]
    BraceWithoutData { key: String },
    #[error("found '{found}' when expecting {{")]
    ExpectedOpenBrace { found: String },
}

/// One key/value pair after aliasing and unescaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityPair {
    pub key: String,
    pub value: String,
}

/// The pairs of a single `{ ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityBlock {
    pub pairs: Vec<EntityPair>,
    /// Pairs read from the text, including comment keys that were dropped.
    pub parsed_pairs: usize,
}

impl EntityBlock {
    /// A block without any pair defines no entity.
    pub fn is_empty(&self) -> bool {
        self.parsed_pairs == 0
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| pair.value.as_str())
    }
}

/// Value of an untyped entity key, inferred from its text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Vector([f32; 3]),
    Number(f64),
    String(String),
}

impl FieldValue {
    /// Tries a three component vector first, then a single number, and keeps
    /// the text as a string otherwise.
    pub fn infer(text: &str) -> FieldValue {
        if let Some(vector) = parse_vector(text) {
            return FieldValue::Vector(vector);
        }
        if let Some(number) = parse_number(text) {
            return FieldValue::Number(number);
        }
        FieldValue::String(text.to_string())
    }
}

pub fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub fn parse_vector(text: &str) -> Option<[f32; 3]> {
    let mut parts = text.split_whitespace();
    let mut out = [0.0_f32; 3];
    for slot in out.iter_mut() {
        *slot = parts
            .next()?
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Turns a literal backslash followed by `n` into a newline.
pub fn unescape_newlines(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'n') {
            chars.next();
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses key/value pairs up to the closing brace. `cursor` must point just
/// past the opening brace. Returns the block and the text after the `}`.
pub fn parse_block_body(cursor: &str) -> Result<(EntityBlock, &str), EntityTextError> {
    let mut tokens = Tokenizer::new(cursor);
    let mut block = EntityBlock::default();

    loop {
        let key = match tokens.next_token() {
            Some("}") => break,
            Some(key) => key,
            None => return Err(EntityTextError::UnexpectedEof),
        };

        // QuakeEd writes a scalar yaw as "angle"
        let (key, angle_hack) = match key {
            "angle" => ("angles", true),
            "light" => ("light_lev", false),
            other => (other, false),
        };

        let value = match tokens.next_token() {
            Some("}") => {
                return Err(EntityTextError::BraceWithoutData {
                    key: key.to_string(),
                });
            }
            Some(value) => value,
            None => return Err(EntityTextError::UnexpectedEof),
        };

        block.parsed_pairs += 1;

        if key.starts_with('_') {
            continue;
        }

        let value = if angle_hack {
            format!("0 {value} 0")
        } else {
            value.to_string()
        };

        block.pairs.push(EntityPair {
            key: key.to_string(),
            value: unescape_newlines(&value),
        });
    }

    Ok((block, tokens.remaining()))
}

/// Reads the next `{ ... }` block, or `None` once the text is exhausted.
pub fn next_block(cursor: &str) -> Result<Option<(EntityBlock, &str)>, EntityTextError> {
    let mut tokens = Tokenizer::new(cursor);
    match tokens.next_token() {
        None => Ok(None),
        Some("{") => parse_block_body(tokens.remaining()).map(Some),
        Some(found) => Err(EntityTextError::ExpectedOpenBrace {
            found: found.to_string(),
        }),
    }
}

pub fn parse_blocks(text: &str) -> Result<Vec<EntityBlock>, EntityTextError> {
    let mut blocks = Vec::new();
    let mut cursor = text;
    while let Some((block, rest)) = next_block(cursor)? {
        blocks.push(block);
        cursor = rest;
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(text: &str) -> EntityBlock {
        let mut blocks = parse_blocks(text).expect("valid entity text");
        assert_eq!(blocks.len(), 1);
        blocks.remove(0)
    }

    #[test]
    fn angle_is_expanded_to_angles() {
        let block = single("{ \"angle\" \"90\" }");
        assert_eq!(block.get("angles"), Some("0 90 0"));
        assert_eq!(block.get("angle"), None);
        assert_eq!(
            FieldValue::infer(block.get("angles").unwrap()),
            FieldValue::infer("0 90 0")
        );
    }

    #[test]
    fn light_is_renamed() {
        let block = single("{ \"light\" \"300\" }");
        assert_eq!(block.get("light_lev"), Some("300"));
    }

    #[test]
    fn underscore_keys_count_but_are_dropped() {
        let block = single("{ \"_color\" \"1 0 0\" }");
        assert!(block.pairs.is_empty());
        assert!(!block.is_empty());
        assert!(single("{ }").is_empty());
    }

    #[test]
    fn escaped_newlines_are_unescaped() {
        let block = single("{ \"message\" \"line one\\nline two\" }");
        assert_eq!(block.get("message"), Some("line one\nline two"));
        assert_eq!(unescape_newlines("a\\tb"), "a\\tb");
    }

    #[test]
    fn inference_prefers_vector_then_number() {
        assert_eq!(FieldValue::infer("1 2 3"), FieldValue::Vector([1.0, 2.0, 3.0]));
        assert_eq!(FieldValue::infer("-12.5"), FieldValue::Number(-12.5));
        assert_eq!(
            FieldValue::infer("1 2"),
            FieldValue::String("1 2".to_string())
        );
        assert_eq!(
            FieldValue::infer("t_door1"),
            FieldValue::String("t_door1".to_string())
        );
        assert_eq!(
            FieldValue::infer("1 2 3 4"),
            FieldValue::String("1 2 3 4".to_string())
        );
    }

    #[test]
    fn malformed_blocks_are_rejected() {
        assert_eq!(
            parse_blocks("{ \"classname\" \"light\""),
            Err(EntityTextError::UnexpectedEof)
        );
        assert_eq!(
            parse_blocks("{ \"classname\" }"),
            Err(EntityTextError::BraceWithoutData {
                key: "classname".to_string()
            })
        );
        assert_eq!(
            parse_blocks("classname light"),
            Err(EntityTextError::ExpectedOpenBrace {
                found: "classname".to_string()
            })
        );
    }

    #[test]
    fn blocks_are_returned_in_source_order() {
        let blocks = parse_blocks(
            "{ \"classname\" \"worldspawn\" }\n{ \"classname\" \"light\" \"origin\" \"0 0 64\" }",
        )
        .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get("classname"), Some("worldspawn"));
        assert_eq!(blocks[1].get("origin"), Some("0 0 64"));
    }
}
