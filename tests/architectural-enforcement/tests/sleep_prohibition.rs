//! Integration Test: Thread Sleep Prohibition
//!
//! **Policy**: Role code runs on the tokio runtime and MUST NOT block a
//! worker thread with `std::thread::sleep`.
//! **Acceptable**: `tokio::time::sleep` for pacing and retry backoff.

use architectural_enforcement::find_violations;

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations =
        find_violations(|code| code.contains("thread::sleep(") || code.contains("use std::thread::sleep"));

    if !violations.is_empty() {
        eprintln!("\n❌ std::thread::sleep found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use tokio::time::sleep(..).await, or wait on the I/O itself.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
