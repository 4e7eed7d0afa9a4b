//! Identifier handling for statements built from caller-supplied names.

mod identifiers;

pub use identifiers::{escape_identifier, parse_qualified_name, qualify, MAX_IDENTIFIER_LENGTH};
