//! Process-wide panic hook.
//!
//! Session workers are tokio tasks, so a panic takes down one worker and the
//! health monitor reaps it. The hook records the panic through `tracing`
//! inside the span that was current when it happened (the worker's `user`
//! span for session panics) and counts it for the health report.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::{AssertUnwindSafe, PanicHookInfo};
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

static PANICS: AtomicU64 = AtomicU64::new(0);
static INSTALL: Once = Once::new();

/// Panics observed since the hook was installed.
pub fn panic_count() -> u64 {
    PANICS.load(Ordering::Relaxed)
}

/// Install the hook. Later calls are no-ops.
///
/// Without a global subscriber the previous hook still prints to stderr.
pub fn install() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            PANICS.fetch_add(1, Ordering::Relaxed);
            let _ = std::panic::catch_unwind(AssertUnwindSafe(|| log_panic(info)));

            if !tracing::dispatcher::has_been_set() {
                previous(info);
            }
        }));
    });
}

fn log_panic(info: &PanicHookInfo<'_>) {
    let message = describe_payload(info.payload());
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread = std::thread::current();
    let thread = thread.name().unwrap_or("<unnamed>");

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        tracing::error!(
            target: "prowler::panic",
            %thread,
            %location,
            total = panic_count(),
            "Panic: {message}\n{backtrace}"
        );
    } else {
        tracing::error!(
            target: "prowler::panic",
            %thread,
            %location,
            total = panic_count(),
            "Panic: {message}"
        );
    }
}

/// Text of a panic payload; `panic!` produces either a `&str` or a `String`.
pub fn describe_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "<non-string panic payload>".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_payload() {
        let literal = std::panic::catch_unwind(|| panic!("worker gave up")).unwrap_err();
        assert_eq!(describe_payload(&*literal), "worker gave up");

        let formatted =
            std::panic::catch_unwind(|| panic!("query {} failed", "camera")).unwrap_err();
        assert_eq!(describe_payload(&*formatted), "query camera failed");

        let other = std::panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(describe_payload(&*other), "<non-string panic payload>");
    }

    #[test]
    fn test_installed_hook_counts_panics() {
        install();
        install();

        let before = panic_count();
        let _ = std::panic::catch_unwind(|| panic!("counted"));
        assert!(panic_count() > before);
    }
}
