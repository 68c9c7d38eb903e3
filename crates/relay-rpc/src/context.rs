//! Request context wrapper
//!
//! Every procedure, middleware and resolver receives its context through
//! [`Context`], a cheap-to-clone shared handle around the value produced by
//! the transport's context factory.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Shared, immutable request context.
///
/// Dereferences to the wrapped value so resolvers can read fields directly:
///
/// ```rust,ignore
/// async fn whoami(ctx: Context<AppContext>, _: ()) -> RpcResult<String> {
///     Ok(ctx.user.clone())
/// }
/// ```
pub struct Context<Ctx> {
    inner: Arc<Ctx>,
}

impl<Ctx> Context<Ctx> {
    /// Wrap a context value.
    pub fn new(ctx: Ctx) -> Self {
        Self {
            inner: Arc::new(ctx),
        }
    }

    /// Borrow the wrapped value.
    pub fn inner(&self) -> &Ctx {
        &self.inner
    }

    /// Returns true if both handles point at the same context value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Ctx> Clone for Context<Ctx> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Ctx> Deref for Context<Ctx> {
    type Target = Ctx;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<Ctx> From<Ctx> for Context<Ctx> {
    fn from(ctx: Ctx) -> Self {
        Self::new(ctx)
    }
}

impl<Ctx: fmt::Debug> fmt::Debug for Context<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.inner).finish()
    }
}

/// Context for routers that don't need any per-request state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyContext;
