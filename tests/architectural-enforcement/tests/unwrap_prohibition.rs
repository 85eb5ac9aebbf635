//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: Role and runner code reports failures as `IpcError`/`anyhow`
//! errors so every role can release its handles and print `ROLE: error`.
//! `unwrap()` and `expect()` are allowed in test code only.

use architectural_enforcement::find_violations;

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = find_violations(|code| code.contains(".unwrap()") || code.contains(".expect("));

    if !violations.is_empty() {
        eprintln!("\n❌ unwrap()/expect() found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Propagate with `?`, or use `unwrap_or`/`unwrap_or_else`/`unwrap_or_default`.");

        panic!(
            "\nFound {} unwrap/expect violation(s) in production code.",
            violations.len()
        );
    }
}
