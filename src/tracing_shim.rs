//! Logging macros that compile away when the `tracing` feature is disabled.
//!
//! Import from here rather than from `tracing` so call sites need no `#[cfg]`. Span attributes are
//! the exception and are written as `#[cfg_attr(feature = "tracing", tracing::instrument)]`.

#![allow(unused_imports, unused_macros)]

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, info, trace, warn};
#[cfg(feature = "tracing")]
pub(crate) use tracing_futures::Instrument;

#[cfg(not(feature = "tracing"))]
macro_rules! event {
    ($($x:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! event_span {
    ($($x:tt)*) => {
        ()
    };
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {event as debug, event as info, event as trace, event as warn, event_span as info_span};

#[cfg(feature = "tracing")]
pub(crate) use tracing::info_span;

/// Attach a span to a future or stream. Without the `tracing` feature this does nothing.
#[cfg(not(feature = "tracing"))]
pub(crate) trait Instrument: Sized {
    fn instrument(self, _span: ()) -> Self {
        self
    }
}

#[cfg(not(feature = "tracing"))]
impl<T> Instrument for T {}
