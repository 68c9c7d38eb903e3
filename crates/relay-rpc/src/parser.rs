//! Input/output parser adapters
//!
//! A [`Parser`] turns a raw JSON value into the value a resolver (or a client)
//! sees. Parsers come from plain functions, async functions, serde types, or
//! schema objects implementing [`Schema`]. Schema objects are probed once, when
//! the parser is built, for the first entry point they expose in priority
//! order: async parse, parse, validate, create. A schema exposing none of them
//! is rejected at construction with [`ParserResolutionError`].
//!
//! ```rust,ignore
//! let input = Parser::typed::<GetUserInput>();
//! let output = Parser::from_fn(|value| {
//!     if value.is_object() { Ok(value) } else { Err("expected an object".into()) }
//! });
//! ```

use crate::error::BoxError;
use crate::validation::Validate;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by asynchronous parse entry points.
pub type ParseFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// Synchronous parse entry point.
pub type SyncParseFn = Arc<dyn Fn(Value) -> Result<Value, BoxError> + Send + Sync>;

/// Asynchronous parse entry point.
pub type AsyncParseFn = Arc<dyn Fn(Value) -> ParseFuture + Send + Sync>;

/// Raised when a schema exposes no recognized parse entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not find a validator fn for the schema `{schema}`")]
pub struct ParserResolutionError {
    /// Name of the offending schema
    pub schema: String,
}

/// Which entry point a [`Parser`] was resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Passes values through untouched
    Identity,
    /// Plain synchronous function
    Function,
    /// Plain asynchronous function
    AsyncFunction,
    /// Schema object, async parse entry point
    ParseAsync,
    /// Schema object, sync parse entry point
    Parse,
    /// Schema object, validate entry point
    Validate,
    /// Schema object, create entry point
    Create,
}

/// Schema object capability.
///
/// Each method returns the corresponding entry point if the schema supports
/// it; the defaults report "unsupported". [`Parser::from_schema`] uses the
/// first supported entry point in declaration order.
pub trait Schema: Send + Sync + 'static {
    /// Asynchronous parse entry point.
    fn parse_async(self: Arc<Self>) -> Option<AsyncParseFn> {
        None
    }

    /// Synchronous parse entry point.
    fn parse(self: Arc<Self>) -> Option<SyncParseFn> {
        None
    }

    /// Validation entry point returning the validated value.
    fn validate(self: Arc<Self>) -> Option<SyncParseFn> {
        None
    }

    /// Construction entry point returning the created value.
    fn create(self: Arc<Self>) -> Option<SyncParseFn> {
        None
    }

    /// Human-readable schema name used in resolution errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

enum Entry {
    Identity,
    Sync(SyncParseFn),
    Async(AsyncParseFn),
}

/// Resolved parser.
#[derive(Clone)]
pub struct Parser {
    kind: ParserKind,
    entry: Arc<Entry>,
}

impl Parser {
    /// Parser that returns its input unchanged.
    pub fn identity() -> Self {
        Self {
            kind: ParserKind::Identity,
            entry: Arc::new(Entry::Identity),
        }
    }

    /// Parser from a synchronous function.
    pub fn from_fn<F, E>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::sync(
            ParserKind::Function,
            Arc::new(move |value: Value| -> Result<Value, BoxError> { f(value).map_err(Into::into) }),
        )
    }

    /// Parser from an asynchronous function.
    pub fn from_async_fn<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let f = Arc::new(f);
        Self {
            kind: ParserKind::AsyncFunction,
            entry: Arc::new(Entry::Async(Arc::new(move |value: Value| -> ParseFuture {
                let fut = f(value);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }))),
        }
    }

    /// Parser from a schema object.
    ///
    /// # Errors
    ///
    /// Returns [`ParserResolutionError`] when the schema exposes none of the
    /// recognized entry points.
    pub fn from_schema<S: Schema>(schema: S) -> Result<Self, ParserResolutionError> {
        let schema = Arc::new(schema);
        if let Some(parse) = Arc::clone(&schema).parse_async() {
            return Ok(Self {
                kind: ParserKind::ParseAsync,
                entry: Arc::new(Entry::Async(parse)),
            });
        }
        if let Some(parse) = Arc::clone(&schema).parse() {
            return Ok(Self::sync(ParserKind::Parse, parse));
        }
        if let Some(validate) = Arc::clone(&schema).validate() {
            return Ok(Self::sync(ParserKind::Validate, validate));
        }
        if let Some(create) = Arc::clone(&schema).create() {
            return Ok(Self::sync(ParserKind::Create, create));
        }
        Err(ParserResolutionError {
            schema: schema.name().to_string(),
        })
    }

    /// Parser that round-trips values through `T`'s serde representation.
    ///
    /// Unknown shapes are rejected; defaults declared on `T` are filled in.
    pub fn typed<T>() -> Self
    where
        T: DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        Self::sync(ParserKind::Parse, TypedSchema::<T>::entry())
    }

    /// Like [`Parser::typed`], additionally running `T`'s [`Validate`] rules.
    pub fn validated<T>() -> Self
    where
        T: DeserializeOwned + Serialize + Validate + Send + Sync + 'static,
    {
        Self::sync(
            ParserKind::Validate,
            Arc::new(|value: Value| -> Result<Value, BoxError> {
                let parsed: T = serde_json::from_value(value)?;
                parsed.validate().into_result()?;
                Ok(serde_json::to_value(parsed)?)
            }),
        )
    }

    fn sync(kind: ParserKind, f: SyncParseFn) -> Self {
        Self {
            kind,
            entry: Arc::new(Entry::Sync(f)),
        }
    }

    /// The entry point this parser resolved to.
    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    /// Parse a raw value.
    pub async fn parse(&self, value: Value) -> Result<Value, BoxError> {
        match self.entry.as_ref() {
            Entry::Identity => Ok(value),
            Entry::Sync(f) => f(value),
            Entry::Async(f) => f(value).await,
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser").field("kind", &self.kind).finish()
    }
}

/// Schema backed by a serde type.
pub struct TypedSchema<T>(PhantomData<fn() -> T>);

impl<T> TypedSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    /// Create the schema.
    pub fn new() -> Self {
        Self(PhantomData)
    }

    fn entry() -> SyncParseFn {
        Arc::new(|value: Value| -> Result<Value, BoxError> {
            let parsed: T = serde_json::from_value(value)?;
            Ok(serde_json::to_value(parsed)?)
        })
    }
}

impl<T> Default for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn parse(self: Arc<Self>) -> Option<SyncParseFn> {
        Some(Self::entry())
    }

    fn name(&self) -> &str {
        std::any::type_name::<T>()
    }
}
