pub mod entities;
pub mod tokenizer;

pub use entities::{
    EntityBlock, EntityPair, EntityTextError, FieldValue, next_block, parse_block_body,
    parse_blocks, parse_number, parse_vector, unescape_newlines,
};
pub use tokenizer::Tokenizer;
