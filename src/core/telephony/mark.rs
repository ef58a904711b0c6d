//! Mark name grammar.
//!
//! Progress marks are named `<itemId>:<chunkCount>`, completion marks
//! `done:<itemId>`. Item ids may themselves contain `:`; the chunk count is
//! always the text after the last one.

use std::fmt;

use thiserror::Error;

const DONE_PREFIX: &str = "done:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkParseError {
    #[error("Empty mark name")]
    Empty,
    #[error("Mark name has no ':' separator: {0}")]
    MissingSeparator(String),
    #[error("Mark name has an empty item id: {0}")]
    EmptyItem(String),
    #[error("Mark name has an invalid chunk count: {0}")]
    InvalidChunk(String),
}

/// Parsed mark name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkName {
    /// Everything up to and including `chunk` of `item_id` has played
    Progress { item_id: String, chunk: u64 },
    /// The whole of `item_id` has played
    Done { item_id: String },
}

impl MarkName {
    pub fn progress(item_id: impl Into<String>, chunk: u64) -> Self {
        MarkName::Progress {
            item_id: item_id.into(),
            chunk,
        }
    }

    pub fn done(item_id: impl Into<String>) -> Self {
        MarkName::Done {
            item_id: item_id.into(),
        }
    }

    pub fn parse(name: &str) -> Result<Self, MarkParseError> {
        if name.is_empty() {
            return Err(MarkParseError::Empty);
        }

        if let Some(item_id) = name.strip_prefix(DONE_PREFIX) {
            if item_id.is_empty() {
                return Err(MarkParseError::EmptyItem(name.to_string()));
            }
            return Ok(MarkName::done(item_id));
        }

        let (item_id, chunk) = name
            .rsplit_once(':')
            .ok_or_else(|| MarkParseError::MissingSeparator(name.to_string()))?;
        if item_id.is_empty() {
            return Err(MarkParseError::EmptyItem(name.to_string()));
        }
        let chunk = chunk
            .parse::<u64>()
            .map_err(|_| MarkParseError::InvalidChunk(name.to_string()))?;

        Ok(MarkName::progress(item_id, chunk))
    }

    pub fn item_id(&self) -> &str {
        match self {
            MarkName::Progress { item_id, .. } | MarkName::Done { item_id } => item_id,
        }
    }
}

impl fmt::Display for MarkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkName::Progress { item_id, chunk } => write!(f, "{item_id}:{chunk}"),
            MarkName::Done { item_id } => write!(f, "{DONE_PREFIX}{item_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            MarkName::parse("item1:12").unwrap(),
            MarkName::progress("item1", 12)
        );
    }

    #[test]
    fn test_parse_done() {
        assert_eq!(MarkName::parse("done:item1").unwrap(), MarkName::done("item1"));
    }

    #[test]
    fn test_item_id_with_colon() {
        let mark = MarkName::parse("resp:item:7").unwrap();
        assert_eq!(mark, MarkName::progress("resp:item", 7));
        assert_eq!(mark.item_id(), "resp:item");
    }

    #[test]
    fn test_display_matches_parse() {
        assert_eq!(MarkName::progress("item_a", 3).to_string(), "item_a:3");
        assert_eq!(MarkName::done("item_a").to_string(), "done:item_a");
    }

    #[test]
    fn test_malformed() {
        assert_eq!(MarkName::parse(""), Err(MarkParseError::Empty));
        assert!(matches!(
            MarkName::parse("item1"),
            Err(MarkParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            MarkName::parse("item1:abc"),
            Err(MarkParseError::InvalidChunk(_))
        ));
        assert!(matches!(
            MarkName::parse("item1:-3"),
            Err(MarkParseError::InvalidChunk(_))
        ));
        assert!(matches!(MarkName::parse(":4"), Err(MarkParseError::EmptyItem(_))));
        assert!(matches!(MarkName::parse("done:"), Err(MarkParseError::EmptyItem(_))));
    }
}
