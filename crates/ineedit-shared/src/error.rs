use thiserror::Error;

/// A stored or transmitted status string did not match any variant of a
/// closed enumeration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
