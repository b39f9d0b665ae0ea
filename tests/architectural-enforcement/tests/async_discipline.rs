//! Integration Test: Async Discipline
//!
//! **Policy**: Workers, the registry and the HTTP surface share one tokio
//! runtime. Production code must not park runtime threads.
//! **Required**: `tokio::time::sleep` / `interval` instead of `std::thread::sleep`,
//! `tokio::net` instead of blocking sockets, and no `std::fs` inside `async fn`.
//!
//! Blocking file reads in plain functions (config loading before the runtime
//! starts) are acceptable.

use architectural_enforcement::production_sources;

fn report(violations: &[String], headline: &str, hint: &str) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ CRITICAL: {headline}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!("\n✅ {hint}");

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (line_number, code) in file.production_lines() {
            if code.contains("thread::sleep") {
                violations.push(file.violation(line_number, "Thread sleep"));
            }
        }
    }

    report(
        &violations,
        "Thread sleeps found in production code!",
        "Wait on a channel, a Notify or tokio::time::interval instead",
    );
}

#[test]
fn test_no_blocking_io_in_async_functions() {
    const BLOCKING_NET: &[&str] = &[
        "std::net::TcpStream",
        "std::net::TcpListener",
        "std::net::UdpSocket",
    ];

    let mut violations = Vec::new();

    for file in production_sources() {
        for (line_number, code) in file.production_lines() {
            if BLOCKING_NET.iter().any(|pattern| code.contains(pattern)) {
                violations.push(file.violation(line_number, "Blocking network I/O"));
            }
            if code.contains("std::fs::") && file.in_async_fn(line_number) {
                violations.push(file.violation(line_number, "Blocking file I/O in async fn"));
            }
            if code.contains("reqwest::blocking") {
                violations.push(file.violation(line_number, "Blocking HTTP client"));
            }
        }
    }

    report(
        &violations,
        "Blocking I/O found in production code!",
        "Use tokio::net / tokio::fs, or read files before the runtime starts",
    );
}

#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (line_number, code) in file.production_lines() {
            if code.contains(".unwrap()") || code.contains(".expect(") {
                violations.push(file.violation(line_number, "Panicking unwrap"));
            }
        }
    }

    report(
        &violations,
        "unwrap()/expect() found in production code!",
        "Propagate with ? or handle the None/Err case",
    );
}
