//! Embeds the git revision for `--version` and keeps source files short.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Non-empty lines allowed per source or workflow file.
const MAX_LINES: usize = 750;

/// Trees holding this crate's sources and bundled manifests.
const CHECKED_ROOTS: &[&str] = &["src", "workflows"];

fn main() {
    for path in [".git/HEAD", ".git/refs/heads", ".git/packed-refs"] {
        println!("cargo:rerun-if-changed={}", path);
    }
    println!("cargo:rustc-env=AGENTIC_LEDGER_GIT_SHA={}", git_sha());

    let root = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let mut oversized = Vec::new();
    for dir in CHECKED_ROOTS {
        let dir = root.join(dir);
        println!("cargo:rerun-if-changed={}", dir.display());
        check_tree(&dir, &root, &mut oversized);
    }

    if !oversized.is_empty() {
        let report: Vec<String> = oversized
            .iter()
            .map(|(path, lines)| format!("  {}: {} non-empty lines", path, lines))
            .collect();
        panic!(
            "files over the {}-line limit; split them into modules:\n{}",
            MAX_LINES,
            report.join("\n")
        );
    }
}

fn git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn check_tree(dir: &Path, root: &Path, oversized: &mut Vec<(String, usize)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            check_tree(&path, root, oversized);
            continue;
        }
        let checked = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "rs" | "yaml" | "yml"));
        if !checked {
            continue;
        }
        println!("cargo:rerun-if-changed={}", path.display());
        match fs::read_to_string(&path) {
            Ok(content) => {
                let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
                if lines > MAX_LINES {
                    let shown = path.strip_prefix(root).unwrap_or(&path);
                    oversized.push((shown.display().to_string(), lines));
                }
            }
            Err(e) => println!("cargo:warning=could not read {}: {}", path.display(), e),
        }
    }
}
