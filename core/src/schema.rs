//! Caller-supplied validation of decoded JSON.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse-and-report contract: turn a JSON value into `Output`, or explain why not.
pub trait Schema {
    type Output;

    fn validate(&self, value: Value) -> Result<Self::Output, String>;
}

/// Validates by deserializing into `T`.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Typed<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for Typed<T> {}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Typed<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned> Schema for Typed<T> {
    type Output = T;

    fn validate(&self, value: Value) -> Result<T, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

impl<T, F> Schema for F
where
    F: Fn(Value) -> Result<T, String>,
{
    type Output = T;

    fn validate(&self, value: Value) -> Result<T, String> {
        self(value)
    }
}
