//! Runtime invariants with contract-test support
//!
//! Production code asserts session invariants with `assert_invariant!`. Every
//! assertion is remembered, so a test can prove that the path it exercised
//! actually went through the check, not only that nothing panicked.
//!
//! ```rust,ignore
//! use crabstream::invariant_ppt::*;
//!
//! assert_invariant!(!recording || streaming, RECORDING_IMPLIES_STREAMING, "orchestrator");
//!
//! #[test]
//! fn contract_session_flags() {
//!     // ... drive a pipeline through start_record on this thread ...
//!     contract_test("session flags", &[RECORDING_IMPLIES_STREAMING]);
//! }
//! ```
//!
//! The log is thread-local: only assertions made on the calling thread are
//! visible to `contract_test`.

use std::cell::RefCell;
use std::collections::HashSet;

/// Recording is a sub-state of streaming
pub const RECORDING_IMPLIES_STREAMING: &str = "Recording implies streaming";
/// Preview and stream never hold the capture surface at the same time
pub const PREVIEW_EXCLUDES_STREAMING: &str = "Preview and streaming are mutually exclusive";
/// The keyframe gate holds back everything until it opens
pub const NO_WRITE_BEFORE_KEYFRAME: &str = "No unit is written before the first video keyframe";

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and log it for contract testing.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("Invariant violated [{}]: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Invariants checked on this thread so far
pub fn checked_invariants() -> Vec<String> {
    let mut checked: Vec<String> =
        INVARIANT_LOG.with(|log| log.borrow().iter().cloned().collect());
    checked.sort();
    checked
}

/// Panics unless every one of `required_invariants` was asserted on this
/// thread since the last `clear_invariant_log`.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = INVARIANT_LOG.with(|log| {
        let log = log.borrow();
        required_invariants
            .iter()
            .copied()
            .filter(|invariant| !log.contains(*invariant))
            .collect()
    });

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| log.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariant_is_logged() {
        clear_invariant_log();
        crate::assert_invariant!(true, RECORDING_IMPLIES_STREAMING);
        assert_eq!(checked_invariants(), vec![RECORDING_IMPLIES_STREAMING.to_string()]);
        contract_test("logged", &[RECORDING_IMPLIES_STREAMING]);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_missing_invariant_fails_contract() {
        clear_invariant_log();
        contract_test("missing", &[NO_WRITE_BEFORE_KEYFRAME]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [unit]")]
    fn test_violation_panics_with_context() {
        crate::assert_invariant!(false, PREVIEW_EXCLUDES_STREAMING, "unit");
    }
}
