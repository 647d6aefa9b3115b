//! In-band `proxyTest` instructions carried inside client commands.
//!
//! A test suite requests a fault on the next reply by adding a top-level
//! field to any command document:
//!
//! ```text
//! { find: "coll", proxyTest: { actions: [ { sendBytes: 1 }, { delayMs: 150 }, { sendAll: true } ] } }
//! ```
//!
//! The field is removed before the command reaches the server. The command is
//! rebuilt element by element from the raw bytes, so every other field keeps
//! its exact encoding and position.

use bson::{RawBsonRef, RawDocument, RawDocumentBuf};
use std::borrow::Cow;

/// Top-level command field holding the instruction block.
pub const PROXY_TEST_FIELD: &str = "proxyTest";

const ACTIONS_FIELD: &str = "actions";
const DELAY_MS_FIELD: &str = "delayMs";
const SEND_BYTES_FIELD: &str = "sendBytes";
const SEND_ALL_FIELD: &str = "sendAll";

/// One step of a fault sequence. Absent fields do nothing; zero is meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    /// Milliseconds to wait before the rest of this step.
    pub delay_ms: Option<u64>,
    /// Bytes to send from the current offset.
    pub send_bytes: Option<usize>,
    /// Send everything from the current offset. Any value flushes, `false` included.
    pub send_all: Option<bool>,
}

/// Ordered actions to replay against the next server reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestInstruction {
    pub actions: Vec<Action>,
}

/// Result of scanning a command document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<'a> {
    /// Document to forward; borrowed (untouched) when no `proxyTest` was present.
    pub document: Cow<'a, [u8]>,
    pub instruction: Option<TestInstruction>,
}

/// Errors raised for a malformed `proxyTest` block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error("malformed command document: {0}")]
    MalformedDocument(String),
    #[error("proxyTest must be a document")]
    ProxyTestNotDocument,
    #[error("proxyTest is missing the 'actions' array")]
    MissingActions,
    #[error("proxyTest.actions must be an array")]
    ActionsNotArray,
    #[error("unknown field '{0}' in proxyTest")]
    UnknownProxyTestField(String),
    #[error("proxyTest.actions[{0}] must be a document")]
    ActionNotDocument(usize),
    #[error("unknown field '{field}' in proxyTest.actions[{index}]")]
    UnknownActionField { index: usize, field: String },
    #[error("invalid value for '{field}' in proxyTest.actions[{index}]: {reason}")]
    InvalidActionValue {
        index: usize,
        field: &'static str,
        reason: &'static str,
    },
}

/// Strip `proxyTest` from a command document and decode its actions.
///
/// Documents without the field come back borrowed and byte-identical. A
/// command that is not well-formed BSON is an error, as is a malformed
/// block; unknown directives are never ignored.
pub fn extract(document: &[u8]) -> Result<Extraction<'_>, DslError> {
    let raw = RawDocument::from_bytes(document).map_err(malformed)?;

    let mut proxy_test = None;
    for entry in raw.iter() {
        let (key, value) = entry.map_err(malformed)?;
        if key == PROXY_TEST_FIELD && proxy_test.is_none() {
            proxy_test = Some(value);
        }
    }
    let Some(value) = proxy_test else {
        return Ok(Extraction {
            document: Cow::Borrowed(document),
            instruction: None,
        });
    };

    let instruction = decode_instruction(value)?;

    let mut cleaned = RawDocumentBuf::new();
    for entry in raw.iter() {
        let (key, value) = entry.map_err(malformed)?;
        if key != PROXY_TEST_FIELD {
            cleaned.append_ref(key, value);
        }
    }

    Ok(Extraction {
        document: Cow::Owned(cleaned.into_bytes()),
        instruction: Some(instruction),
    })
}

fn malformed(e: bson::raw::Error) -> DslError {
    DslError::MalformedDocument(e.to_string())
}

fn decode_instruction(value: RawBsonRef<'_>) -> Result<TestInstruction, DslError> {
    let RawBsonRef::Document(block) = value else {
        return Err(DslError::ProxyTestNotDocument);
    };

    let mut actions = None;
    for entry in block.iter() {
        let (key, value) = entry.map_err(malformed)?;
        match key {
            ACTIONS_FIELD => match value {
                RawBsonRef::Array(array) => actions = Some(array),
                _ => return Err(DslError::ActionsNotArray),
            },
            other => return Err(DslError::UnknownProxyTestField(other.to_string())),
        }
    }
    let actions = actions.ok_or(DslError::MissingActions)?;

    let mut decoded = Vec::new();
    for (index, item) in actions.into_iter().enumerate() {
        let item = item.map_err(malformed)?;
        let RawBsonRef::Document(step) = item else {
            return Err(DslError::ActionNotDocument(index));
        };
        decoded.push(decode_action(index, step)?);
    }

    Ok(TestInstruction { actions: decoded })
}

fn decode_action(index: usize, step: &RawDocument) -> Result<Action, DslError> {
    let mut action = Action::default();
    for entry in step.iter() {
        let (key, value) = entry.map_err(malformed)?;
        match key {
            DELAY_MS_FIELD => {
                action.delay_ms = Some(non_negative(index, DELAY_MS_FIELD, value)?);
            }
            SEND_BYTES_FIELD => {
                let n = non_negative(index, SEND_BYTES_FIELD, value)?;
                action.send_bytes = Some(usize::try_from(n).map_err(|_| {
                    DslError::InvalidActionValue {
                        index,
                        field: SEND_BYTES_FIELD,
                        reason: "out of range",
                    }
                })?);
            }
            SEND_ALL_FIELD => match value {
                RawBsonRef::Boolean(flag) => action.send_all = Some(flag),
                _ => {
                    return Err(DslError::InvalidActionValue {
                        index,
                        field: SEND_ALL_FIELD,
                        reason: "expected a boolean",
                    })
                }
            },
            other => {
                return Err(DslError::UnknownActionField {
                    index,
                    field: other.to_string(),
                })
            }
        }
    }
    Ok(action)
}

/// Accept int32, int64, or an integral double (drivers for dynamic languages
/// often send numbers as doubles).
fn non_negative(
    index: usize,
    field: &'static str,
    value: RawBsonRef<'_>,
) -> Result<u64, DslError> {
    let invalid = |reason| DslError::InvalidActionValue {
        index,
        field,
        reason,
    };
    match value {
        RawBsonRef::Int32(n) => u64::try_from(n).map_err(|_| invalid("must not be negative")),
        RawBsonRef::Int64(n) => u64::try_from(n).map_err(|_| invalid("must not be negative")),
        RawBsonRef::Double(f) => {
            if f.fract() != 0.0 || !f.is_finite() {
                Err(invalid("must be an integer"))
            } else if f < 0.0 {
                Err(invalid("must not be negative"))
            } else if f > u32::MAX as f64 {
                Err(invalid("out of range"))
            } else {
                Ok(f as u64)
            }
        }
        _ => Err(invalid("expected an integer")),
    }
}
