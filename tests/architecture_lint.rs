#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Architecture enforcement lint - keeps controller I/O behind the entity layer.
//!
//! Two rules:
//!
//! 1. The outer surfaces (HTTP API, MQTT bridge) never talk to the controller
//!    directly. They go through `EntityCoordinator` or the bus, so every write
//!    is serialized per entity and followed by a resync that the other
//!    surfaces observe.
//! 2. Reconciliation, volume mapping and media helpers stay pure: no client,
//!    no runtime, no async.
//!
//! Only non-test code is checked; test modules may build fakes freely.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Patterns that bypass the coordinator from an outer surface
const SURFACE_DISALLOWED: &[(&str, &str)] = &[
    (
        "AmpliPiClient",
        "Use state.coordinator (or publish CommandReceived) instead",
    ),
    (
        "AmpliPiApi",
        "Use state.coordinator (or publish CommandReceived) instead",
    ),
    (
        "SnapshotFetcher",
        "Read views from the coordinator instead of fetching snapshots",
    ),
    (
        "entity::execute",
        "Dispatch through EntityCoordinator::command",
    ),
];

/// Files treated as outer surfaces
const SURFACE_FILES: &[&str] = &["api/mod.rs", "adapters/mqtt.rs"];

/// Patterns that make a module impure
const PURE_DISALLOWED: &[(&str, &str)] = &[
    ("async fn", "Keep reconciliation synchronous"),
    ("tokio::", "No runtime access in pure modules"),
    ("reqwest", "No HTTP in pure modules"),
    ("AmpliPiApi", "Take a Snapshot, not a client"),
];

/// Modules that must stay pure functions of their inputs
const PURE_FILES: &[&str] = &["entity/reconcile.rs", "volume.rs", "media.rs"];

/// Source text before the first `#[cfg(test)]`
fn production_code(content: &str) -> &str {
    match content.find("#[cfg(test)]") {
        Some(pos) => &content[..pos],
        None => content,
    }
}

fn find_violations(
    path_str: &str,
    content: &str,
    patterns: &[(&str, &str)],
) -> Vec<(String, String, String)> {
    let code = production_code(content);
    let mut violations = Vec::new();

    for (pattern, suggestion) in patterns {
        let mut search_from = 0;
        while let Some(pos) = code[search_from..].find(pattern) {
            let absolute_pos = search_from + pos;
            let line_num = code[..absolute_pos].matches('\n').count() + 1;

            // Doc comments may name the type
            let line_start = code[..absolute_pos].rfind('\n').map_or(0, |p| p + 1);
            if !code[line_start..absolute_pos].trim_start().starts_with("//") {
                violations.push((
                    format!("{}:{}", path_str, line_num),
                    (*pattern).to_string(),
                    (*suggestion).to_string(),
                ));
            }

            search_from = absolute_pos + pattern.len();
        }
    }

    violations
}

fn analyze_file(path: &Path) -> Vec<(String, String, String)> {
    let path_str = path.display().to_string().replace('\\', "/");

    let patterns: &[(&str, &str)] = if SURFACE_FILES.iter().any(|f| path_str.ends_with(f)) {
        SURFACE_DISALLOWED
    } else if PURE_FILES
        .iter()
        .any(|f| path_str.ends_with(&format!("/{}", f)))
    {
        PURE_DISALLOWED
    } else {
        return vec![];
    };

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return vec![],
    };

    find_violations(&path_str, &content, patterns)
}

#[test]
fn detects_surface_bypass() {
    let code = r#"
        pub async fn handler(State(state): State<AppState>) {
            let client = AmpliPiClient::new("http://x/api").unwrap();
        }
    "#;
    let violations = find_violations("src/api/mod.rs", code, SURFACE_DISALLOWED);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].1, "AmpliPiClient");
}

#[test]
fn ignores_test_modules_and_comments() {
    let code = r#"
        /// Never touches AmpliPiApi directly.
        pub fn router() {}

        #[cfg(test)]
        mod tests {
            use crate::amplipi::AmpliPiApi;
        }
    "#;
    assert!(find_violations("src/api/mod.rs", code, SURFACE_DISALLOWED).is_empty());
}

#[test]
fn surfaces_go_through_coordinator() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

    let mut all_violations = Vec::new();

    for entry in WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let violations = analyze_file(entry.path());
        all_violations.extend(violations);
    }

    if !all_violations.is_empty() {
        let mut error_msg = String::from(
            "\n\nARCHITECTURE VIOLATION: controller I/O outside the entity layer\n\n\
            Outer surfaces must use EntityCoordinator; reconciliation modules must\n\
            stay pure.\n\n\
            Violations found:\n\n",
        );

        for (location, pattern, suggestion) in &all_violations {
            error_msg.push_str(&format!("  {} \n", location));
            error_msg.push_str(&format!("    Found: {}\n", pattern));
            error_msg.push_str(&format!("    Fix: {}\n\n", suggestion));
        }

        panic!("{}", error_msg);
    }
}

#[test]
fn coordinator_exists_in_app_state() {
    let api_mod = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("src")
        .join("api")
        .join("mod.rs");

    let content = fs::read_to_string(&api_mod).expect("Failed to read api/mod.rs");

    assert!(
        content.contains("pub coordinator: EntityCoordinator"),
        "AppState must have a `pub coordinator: EntityCoordinator` field"
    );
}
