// src/error.rs
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    #[error("truncated input: needed {needed} bits, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },

    #[error("value {value:#x} does not fit in {bits} bits")]
    ValueOverflow { value: u64, bits: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed cue: {0}")]
    MalformedCue(String),

    #[error("encode failure: {0}")]
    EncodeFailure(String),

    #[error(transparent)]
    Bitstream(#[from] BitstreamError),
}

impl CodecError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self { CodecError::MalformedCue(msg.into()) }
    pub(crate) fn encode(msg: impl Into<String>) -> Self { CodecError::EncodeFailure(msg.into()) }
}

/// A condition or replace parameter that cannot be applied to a cue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("unknown property '{0}'")]
    UnknownProperty(String),

    #[error("cannot coerce '{value}' for {property}: expected {expected}")]
    Coercion { property: String, value: String, expected: &'static str },

    #[error("{property} is derived and cannot be replaced")]
    ReadOnly { property: String },

    #[error("{property} is not carried by {carrier}")]
    NotCarried { property: String, carrier: &'static str },

    #[error("{property} value {value} does not fit the field")]
    OutOfRange { property: String, value: String },

    #[error("replace parameter must hold exactly one property, got {0}")]
    MalformedParam(usize),

    #[error("unsupported operator '{0}'")]
    UnknownOperator(String),

    #[error("replace rule has no replace_params")]
    MissingReplaceParams,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EsamError {
    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("missing acquisitionSignalID")]
    MissingSignalId,
}

/// Taxonomy of degraded outcomes a disposition can carry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("channel not registered")]
    ConfigNotFound,

    #[error("decode failed: {0}")]
    MalformedCue(CodecError),

    #[error("encode failed: {0}")]
    EncodeFailure(CodecError),

    #[error("invalid rule reference: {0}")]
    InvalidRuleReference(RuleError),

    #[error("{0}")]
    StoreUnavailable(StoreError),
}
