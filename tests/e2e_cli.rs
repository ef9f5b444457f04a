//! Binary process tests.
//!
//! Startup failures exit before any listener or agent starts. The signal
//! tests run a real population against an unreachable backend with every
//! listener on an ephemeral or disabled port.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Duration;

fn loadit() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_loadit"));
    for (key, _) in std::env::vars() {
        if key.starts_with("LOADIT_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn test_invalid_env_integer_exits_before_startup() {
    let output = loadit()
        .env("LOADIT_COUNT", "not-a-number")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("LOADIT_COUNT"));
}

#[test]
fn test_invalid_flag_exits_before_startup() {
    let output = loadit().arg("--count=abc").output().unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_zero_count_rejected() {
    let output = loadit().arg("--count=0").output().unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_help_names_every_option() {
    let output = loadit().arg("--help").output().unwrap();
    assert!(output.status.success());

    let help = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--count",
        "--backends",
        "--namespace",
        "--subscriptions",
        "--keepalive-interval",
        "--keepalive-timeout",
        "--pprof-port",
        "--prom",
        "--user",
        "--password",
        "--base-entity-name",
        "--entity-offset",
    ] {
        assert!(help.contains(flag), "help is missing {flag}");
    }
    assert!(help.contains("Offset added to each agent's index"));
}

/// Run a small population, send `signal` once the report is printed, and
/// return the exit status together with everything written to stdout.
#[cfg(unix)]
fn run_until_signal(signal: &str) -> (std::process::ExitStatus, Vec<String>) {
    let mut child = loadit()
        .args([
            "--count=5",
            "--backends=ws://127.0.0.1:9",
            "--pprof-port=0",
            "--prom=",
            "--base-entity-name=h",
            "--entity-offset=10",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut lines = Vec::new();
    for _ in 0..2 {
        let mut line = String::new();
        stdout.read_line(&mut line).unwrap();
        lines.push(line.trim_end().to_string());
    }

    // Handlers are installed right after the report is printed.
    std::thread::sleep(Duration::from_millis(500));
    let status = Command::new("kill")
        .arg(signal)
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if std::time::Instant::now() > deadline {
            let _ = child.kill();
            panic!("loadit did not exit after {signal}");
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    for line in stdout.lines() {
        lines.push(line.unwrap());
    }
    (status, lines)
}

#[cfg(unix)]
#[test]
fn test_sigint_exits_cleanly_after_report() {
    let (status, lines) = run_until_signal("-INT");

    assert!(status.success(), "exit status {status:?}");
    assert!(lines[0].starts_with("all agents have been connected in "));
    assert_eq!(lines[1], "h-11 ... h-15");
    assert_eq!(lines.len(), 2);
}

#[cfg(unix)]
#[test]
fn test_sigterm_exits_cleanly_after_report() {
    let (status, lines) = run_until_signal("-TERM");

    assert!(status.success(), "exit status {status:?}");
    assert!(lines[0].starts_with("all agents have been connected in "));
    assert_eq!(lines[1], "h-11 ... h-15");
    assert_eq!(lines.len(), 2);
}
