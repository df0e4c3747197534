//! Embeds the build identity reported by `atlas-ingest` at startup

use std::process::Command;

/// Abbreviated commit, suffixed `-dirty` for uncommitted changes
fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty=-dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    let revision = revision.trim();
    (!revision.is_empty()).then(|| revision.to_string())
}

fn main() {
    let revision = git_revision().unwrap_or_else(|| "unknown".to_string());
    let built_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=ATLAS_GIT_REVISION={}", revision);
    println!("cargo:rustc-env=ATLAS_BUILT_AT={}", built_at);
    println!("cargo:rustc-env=ATLAS_BUILD_PROFILE={}", profile);

    println!("cargo:rerun-if-changed=build.rs");
    if std::path::Path::new("../.git/HEAD").exists() {
        println!("cargo:rerun-if-changed=../.git/HEAD");
    }
}
