//! Build script to inject version and git SHA at compile time.
//!
//! Environment variables (set by CI or fall back to defaults):
//! - AMPLIPI_CONTROL_VERSION: Version string (defaults to CARGO_PKG_VERSION)
//! - AMPLIPI_CONTROL_GIT_SHA: Git commit SHA (defaults to git rev-parse or "unknown")

use std::process::Command;

fn main() {
    let version = std::env::var("AMPLIPI_CONTROL_VERSION").unwrap_or_else(|_| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".into())
    });
    println!("cargo:rustc-env=AMPLIPI_CONTROL_VERSION={}", version);

    let git_sha = std::env::var("AMPLIPI_CONTROL_GIT_SHA")
        .ok()
        .or_else(|| {
            std::env::var("GITHUB_SHA")
                .ok()
                .map(|s| s.get(..7).unwrap_or(&s).to_string())
        })
        .unwrap_or_else(get_git_sha);
    println!("cargo:rustc-env=AMPLIPI_CONTROL_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=AMPLIPI_CONTROL_VERSION");
    println!("cargo:rerun-if-env-changed=AMPLIPI_CONTROL_GIT_SHA");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}

fn get_git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| {
            if o.status.success() {
                String::from_utf8(o.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".into())
}
