// Logging shims: with `feature = "tracing"` these forward to `tracing` under the
// `virtual_scroller` target, otherwise they compile to nothing.

#[cfg(feature = "tracing")]
macro_rules! vtrace {
    ($($tt:tt)*) => {
        tracing::trace!(target: "virtual_scroller", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vtrace {
    ($($tt:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! vdebug {
    ($($tt:tt)*) => {
        tracing::debug!(target: "virtual_scroller", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vdebug {
    ($($tt:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! vwarn {
    ($($tt:tt)*) => {
        tracing::warn!(target: "virtual_scroller", $($tt)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! vwarn {
    ($($tt:tt)*) => {};
}

/// Process transition log, gated on `DevSettings::log_process_run`.
macro_rules! process_log {
    ($dev:expr, $($tt:tt)*) => {
        if $dev.log_process_run {
            vtrace!($($tt)*);
        }
    };
}

/// Cycle/fetch diagnostics, gated on `DevSettings::debug`.
macro_rules! cycle_log {
    ($dev:expr, $($tt:tt)*) => {
        if $dev.debug {
            vdebug!($($tt)*);
        }
    };
}
