//! Wire protocol: tagged-tuple JSON frames.
//!
//! Each frame is a JSON array whose first element is the message type,
//! followed by that type's fields in order:
//!
//! ```text
//! ["eval_request", id, code, args, cast]
//! ["eval_resolve", id, output, cast]
//! ["eval_reject", id, reason?]
//! ["callback_create", id]
//! ["callback_request", requestId, calleeId, args, cast]
//! ["callback_resolve", id, output, cast]
//! ["callback_reject", id, reason?]
//! ["callback_delete", id]
//! ["event", name, args, cast]
//! ```
//!
//! Decoding validates everything up front: arity, primitive field types,
//! and cast-tree well-formedness. Any violation yields `MalformedMessage`,
//! which the session turns into a silent drop - the deliberate robustness
//! posture against a malformed or adversarial peer.

use serde_json::{json, Value};

use crate::codec::Cast;
use crate::error::{BridgeError, Result};

/// A validated protocol message. Closed set; dispatch is exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    EvalRequest {
        id: u64,
        code: String,
        args: Vec<Value>,
        cast: Vec<Cast>,
    },
    EvalResolve {
        id: u64,
        output: Vec<Value>,
        cast: Vec<Cast>,
    },
    EvalReject {
        id: u64,
        reason: Option<String>,
    },
    CallbackCreate {
        id: u64,
    },
    CallbackRequest {
        request_id: u64,
        callback_id: u64,
        args: Vec<Value>,
        cast: Vec<Cast>,
    },
    CallbackResolve {
        id: u64,
        output: Vec<Value>,
        cast: Vec<Cast>,
    },
    CallbackReject {
        id: u64,
        reason: Option<String>,
    },
    CallbackDelete {
        id: u64,
    },
    Event {
        name: String,
        args: Vec<Value>,
        cast: Vec<Cast>,
    },
}

impl WireMessage {
    /// Render the frame as compact JSON text.
    pub fn encode(&self) -> String {
        let frame = match self {
            WireMessage::EvalRequest {
                id,
                code,
                args,
                cast,
            } => json!(["eval_request", id, code, args, cast]),
            WireMessage::EvalResolve { id, output, cast } => {
                json!(["eval_resolve", id, output, cast])
            }
            WireMessage::EvalReject { id, reason } => match reason {
                Some(reason) => json!(["eval_reject", id, reason]),
                None => json!(["eval_reject", id]),
            },
            WireMessage::CallbackCreate { id } => json!(["callback_create", id]),
            WireMessage::CallbackRequest {
                request_id,
                callback_id,
                args,
                cast,
            } => json!(["callback_request", request_id, callback_id, args, cast]),
            WireMessage::CallbackResolve { id, output, cast } => {
                json!(["callback_resolve", id, output, cast])
            }
            WireMessage::CallbackReject { id, reason } => match reason {
                Some(reason) => json!(["callback_reject", id, reason]),
                None => json!(["callback_reject", id]),
            },
            WireMessage::CallbackDelete { id } => json!(["callback_delete", id]),
            WireMessage::Event { name, args, cast } => json!(["event", name, args, cast]),
        };
        frame.to_string()
    }

    /// Parse and validate an inbound text frame.
    pub fn decode(text: &str) -> Result<WireMessage> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::malformed(format!("invalid JSON: {e}")))?;
        let Value::Array(fields) = frame else {
            return Err(BridgeError::malformed("frame is not an array"));
        };
        let tag = fields
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::malformed("missing type tag"))?;

        match tag {
            "eval_request" => {
                let id = field_id(&fields, 1)?;
                let code = field_string(&fields, 2)?;
                let (args, cast) = field_payload(&fields, 3, 4)?;
                Ok(WireMessage::EvalRequest {
                    id,
                    code,
                    args,
                    cast,
                })
            }
            "eval_resolve" => {
                let id = field_id(&fields, 1)?;
                let (output, cast) = field_payload(&fields, 2, 3)?;
                Ok(WireMessage::EvalResolve { id, output, cast })
            }
            "eval_reject" => Ok(WireMessage::EvalReject {
                id: field_id(&fields, 1)?,
                reason: field_reason(&fields, 2)?,
            }),
            "callback_create" => Ok(WireMessage::CallbackCreate {
                id: field_id(&fields, 1)?,
            }),
            "callback_request" => {
                let request_id = field_id(&fields, 1)?;
                let callback_id = field_id(&fields, 2)?;
                let (args, cast) = field_payload(&fields, 3, 4)?;
                Ok(WireMessage::CallbackRequest {
                    request_id,
                    callback_id,
                    args,
                    cast,
                })
            }
            "callback_resolve" => {
                let id = field_id(&fields, 1)?;
                let (output, cast) = field_payload(&fields, 2, 3)?;
                Ok(WireMessage::CallbackResolve { id, output, cast })
            }
            "callback_reject" => Ok(WireMessage::CallbackReject {
                id: field_id(&fields, 1)?,
                reason: field_reason(&fields, 2)?,
            }),
            "callback_delete" => Ok(WireMessage::CallbackDelete {
                id: field_id(&fields, 1)?,
            }),
            "event" => {
                let name = field_string(&fields, 1)?;
                let (args, cast) = field_payload(&fields, 2, 3)?;
                Ok(WireMessage::Event { name, args, cast })
            }
            other => Err(BridgeError::malformed(format!("unknown type {other:?}"))),
        }
    }
}

fn field_id(fields: &[Value], index: usize) -> Result<u64> {
    fields
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| BridgeError::malformed(format!("field {index} is not an id")))
}

fn field_string(fields: &[Value], index: usize) -> Result<String> {
    fields
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::malformed(format!("field {index} is not a string")))
}

/// Optional rejection reason: absent or null means none; anything other
/// than a string otherwise is malformed.
fn field_reason(fields: &[Value], index: usize) -> Result<Option<String>> {
    match fields.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(reason)) => Ok(Some(reason.clone())),
        Some(_) => Err(BridgeError::malformed(format!(
            "field {index} is not a reason string"
        ))),
    }
}

/// A payload is an argument array plus a matching cast array; the cast
/// array must itself be a well-formed cast tree.
fn field_payload(fields: &[Value], args_index: usize, cast_index: usize) -> Result<(Vec<Value>, Vec<Cast>)> {
    let args = match fields.get(args_index) {
        Some(Value::Array(items)) => items.clone(),
        _ => {
            return Err(BridgeError::malformed(format!(
                "field {args_index} is not an argument array"
            )))
        }
    };
    let cast = match fields.get(cast_index) {
        Some(value @ Value::Array(_)) => match Cast::from_wire(value) {
            Some(Cast::Seq(casts)) => casts,
            _ => {
                return Err(BridgeError::malformed(format!(
                    "field {cast_index} is not a valid cast tree"
                )))
            }
        },
        _ => {
            return Err(BridgeError::malformed(format!(
                "field {cast_index} is not a cast array"
            )))
        }
    };
    Ok((args, cast))
}
