//! Contract violations and the error-report hook.
//!
//! Nothing in this crate recovers from a misconfiguration. A failed check builds an
//! [`ErrorReport`], hands it to the registered [`ErrorHook`] (if any) and then halts the hart.
//! Halting spins forever so a debugger can be attached.

use core::fmt;

use log::error;
use spin::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidHartId = 1,
    SourceOutOfRange = 2,
    InvalidPriority = 3,
    InvalidThreshold = 4,
    NullVectorTable = 5,
    NullHandler = 6,
    InvalidCascadePeriod = 7,
    InvalidConfig = 8,
    UnknownCsr = 9,
    BusFault = 10,
    LockStarvation = 11,
    Unbalanced = 12,
}

impl ErrorCode {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// What went wrong, plus a diagnostic token (usually the offending value).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub token: usize,
    pub file: &'static str,
    pub line: u32,
}

impl ErrorReport {
    pub const fn new(code: ErrorCode, token: usize, file: &'static str, line: u32) -> Self {
        Self {
            code,
            token,
            file,
            line,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (code {}, token {:#x}) at {}:{}",
            self.code,
            self.code.as_u32(),
            self.token,
            self.file,
            self.line
        )
    }
}

/// Called with every fatal report before the hart halts. It may log, reset the
/// system, or halt by itself; if it returns, the hart halts anyway.
pub type ErrorHook = fn(&ErrorReport);

static ERROR_HOOK: RwLock<Option<ErrorHook>> = RwLock::new(None);

/// Installs `hook` and returns the previously installed one.
pub fn set_error_hook(hook: Option<ErrorHook>) -> Option<ErrorHook> {
    core::mem::replace(&mut *ERROR_HOOK.write(), hook)
}

pub fn error_hook() -> Option<ErrorHook> {
    *ERROR_HOOK.read()
}

/// Reports a contract violation and never returns.
#[cold]
pub fn fatal(report: &ErrorReport) -> ! {
    error!("psp: fatal {}", report);

    // Copy the hook out so the lock is not held while it runs.
    let hook = error_hook();
    if let Some(hook) = hook {
        hook(report);
    }

    halt(report)
}

#[cfg(test)]
fn halt(report: &ErrorReport) -> ! {
    panic!("{:?}: {}", report.code, report);
}

#[cfg(not(test))]
fn halt(_report: &ErrorReport) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Checks a contract condition; on failure reports `ErrorCode::$code` with `$token` and halts.
macro_rules! psp_assert {
    ($cond:expr, $code:ident) => {
        $crate::error::psp_assert!($cond, $code, 0)
    };
    ($cond:expr, $code:ident, $token:expr) => {
        if !($cond) {
            $crate::error::fatal(&$crate::error::ErrorReport::new(
                $crate::error::ErrorCode::$code,
                ($token) as usize,
                file!(),
                line!(),
            ));
        }
    };
}

pub(crate) use psp_assert;

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static SEEN_TOKEN: AtomicUsize = AtomicUsize::new(0);

    // Other tests fail config checks concurrently; only count this test's token.
    fn record_config_errors(report: &ErrorReport) {
        if report.code == ErrorCode::InvalidConfig && report.token == 0xABCD {
            SEEN_TOKEN.store(report.token, Ordering::SeqCst);
        }
    }

    #[test]
    fn report_formats_code_and_token() {
        let report = ErrorReport::new(ErrorCode::InvalidPriority, 16, "pic.rs", 10);
        let text = format!("{}", report);
        assert!(text.starts_with("InvalidPriority (code 3, token 0x10)"));
        assert!(text.ends_with("pic.rs:10"));
    }

    #[test]
    #[should_panic(expected = "NullHandler")]
    fn failed_assert_halts() {
        psp_assert!(1 + 1 == 3, NullHandler, 7);
    }

    #[test]
    fn passing_assert_continues() {
        psp_assert!(true, NullHandler);
    }

    #[test]
    fn hook_sees_report_before_halt() {
        let previous = set_error_hook(Some(record_config_errors));
        let result = std::panic::catch_unwind(|| {
            psp_assert!(false, InvalidConfig, 0xABCD);
        });
        set_error_hook(previous);

        assert!(result.is_err());
        assert_eq!(SEEN_TOKEN.load(Ordering::SeqCst), 0xABCD);
    }
}
