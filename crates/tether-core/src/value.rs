//! Application-level values exchanged across the bridge.
//!
//! `BridgeValue` is a closed enum over everything that can cross the wire:
//! JSON-like scalars and containers, plus live function references. A
//! function value is a `CallbackFn` - an `Arc`'d trait object - so a proxy
//! for a peer-owned callback and a locally-owned closure look identical to
//! the rest of the system and can be nested anywhere inside arguments or
//! results.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A callable owned by one side of the bridge.
///
/// Implementations may suspend and issue further bridge traffic before
/// completing; the session never holds its state lock across an invocation.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Invoke the callback with deserialized arguments.
    async fn invoke(&self, args: Vec<BridgeValue>) -> Result<Vec<BridgeValue>>;
}

/// Shared handle to a callback. Identity comparison is `Arc::ptr_eq`.
pub type CallbackFn = Arc<dyn Callback>;

struct ClosureCallback<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Callback for ClosureCallback<F, Fut>
where
    F: Fn(Vec<BridgeValue>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<BridgeValue>>> + Send,
{
    async fn invoke(&self, args: Vec<BridgeValue>) -> Result<Vec<BridgeValue>> {
        (self.f)(args).await
    }
}

/// Adapt an async closure into a `CallbackFn`.
pub fn callback_fn<F, Fut>(f: F) -> CallbackFn
where
    F: Fn(Vec<BridgeValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<BridgeValue>>> + Send + 'static,
{
    Arc::new(ClosureCallback {
        f,
        _marker: PhantomData,
    })
}

/// A value that can cross the bridge.
#[derive(Clone)]
pub enum BridgeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<BridgeValue>),
    Object(BTreeMap<String, BridgeValue>),
    Function(CallbackFn),
}

impl BridgeValue {
    /// Numeric accessor for integer-valued numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BridgeValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BridgeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BridgeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The function reference, if this value is one.
    pub fn as_function(&self) -> Option<&CallbackFn> {
        match self {
            BridgeValue::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Debug for BridgeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeValue::Null => write!(f, "Null"),
            BridgeValue::Bool(b) => write!(f, "Bool({b})"),
            BridgeValue::Number(n) => write!(f, "Number({n})"),
            BridgeValue::String(s) => write!(f, "String({s:?})"),
            BridgeValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            BridgeValue::Object(fields) => f.debug_tuple("Object").field(fields).finish(),
            BridgeValue::Function(cb) => write!(f, "Function({:p})", Arc::as_ptr(cb)),
        }
    }
}

impl PartialEq for BridgeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BridgeValue::Null, BridgeValue::Null) => true,
            (BridgeValue::Bool(a), BridgeValue::Bool(b)) => a == b,
            (BridgeValue::Number(a), BridgeValue::Number(b)) => a == b,
            (BridgeValue::String(a), BridgeValue::String(b)) => a == b,
            (BridgeValue::Array(a), BridgeValue::Array(b)) => a == b,
            (BridgeValue::Object(a), BridgeValue::Object(b)) => a == b,
            (BridgeValue::Function(a), BridgeValue::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for BridgeValue {
    fn from(value: bool) -> Self {
        BridgeValue::Bool(value)
    }
}

impl From<i64> for BridgeValue {
    fn from(value: i64) -> Self {
        BridgeValue::Number(value.into())
    }
}

impl From<u64> for BridgeValue {
    fn from(value: u64) -> Self {
        BridgeValue::Number(value.into())
    }
}

impl From<i32> for BridgeValue {
    fn from(value: i32) -> Self {
        BridgeValue::Number(value.into())
    }
}

impl From<&str> for BridgeValue {
    fn from(value: &str) -> Self {
        BridgeValue::String(value.to_string())
    }
}

impl From<String> for BridgeValue {
    fn from(value: String) -> Self {
        BridgeValue::String(value)
    }
}

impl From<Vec<BridgeValue>> for BridgeValue {
    fn from(value: Vec<BridgeValue>) -> Self {
        BridgeValue::Array(value)
    }
}

impl From<CallbackFn> for BridgeValue {
    fn from(value: CallbackFn) -> Self {
        BridgeValue::Function(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_callback_fn_invokes_closure() {
        let cb = callback_fn(|args| async move {
            let doubled = args
                .iter()
                .filter_map(BridgeValue::as_i64)
                .map(|n| BridgeValue::from(n * 2))
                .collect();
            Ok(doubled)
        });

        let out = cb.invoke(vec![3.into(), 4.into()]).await.unwrap();
        assert_eq!(out, vec![BridgeValue::from(6), BridgeValue::from(8)]);
    }

    #[test]
    fn test_function_equality_is_identity() {
        let a = callback_fn(|_| async { Ok(Vec::new()) });
        let b = callback_fn(|_| async { Ok(Vec::new()) });

        assert_eq!(
            BridgeValue::Function(a.clone()),
            BridgeValue::Function(a.clone())
        );
        assert_ne!(BridgeValue::Function(a), BridgeValue::Function(b));
    }
}
