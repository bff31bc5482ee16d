//! Supporting utility type.
mod bytestr;
pub use bytestr::ByteStr;

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::trace!($($tt)*)
    };
}

/// Run a future inside a trace `Span` when `verbose` feature enabled.
///
/// The span is only entered while the future is polled.
#[cfg(feature = "verbose")]
macro_rules! instrument {
    ($fut:expr, $($tt:tt)*) => {
        tracing::Instrument::instrument($fut, tracing::trace_span!($($tt)*))
    };
}

#[cfg(not(feature = "verbose"))]
macro_rules! instrument {
    ($fut:expr, $($tt:tt)*) => {
        $fut
    };
}

/// Warn when `log` feature enabled.
macro_rules! warning {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        log::warn!($($tt)*)
    };
}

pub(crate) use verbose;
pub(crate) use instrument;
pub(crate) use warning;
