//! Build script for personality-net
//!
//! Embeds git revision, build timestamp, target and compiler version.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_output("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = is_git_dirty();

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let rustc_version = command_output("rustc", &["--version"]);

    println!("cargo:rustc-env=PNET_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=PNET_GIT_BRANCH={}", git_branch);
    println!("cargo:rustc-env=PNET_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=PNET_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=PNET_TARGET={}", target);
    println!("cargo:rustc-env=PNET_PROFILE={}", profile);
    println!("cargo:rustc-env=PNET_RUSTC_VERSION={}", rustc_version);
}

/// Trimmed stdout of a successful command, or "unknown"
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_git_dirty() -> &'static str {
    Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .map(|output| {
            if output.status.success() && !output.stdout.is_empty() {
                "true"
            } else {
                "false"
            }
        })
        .unwrap_or("unknown")
}
