use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde_json::Value;

use taskgrid_core::config::OrchestratorConfig;
use taskgrid_core::domain::Language;
use taskgrid_core::runner::{RunnerContext, RunnerRegistry};

struct RuntimeCheck {
    language: &'static str,
    available: bool,
    detail: String,
}

fn language_from_str(name: &str) -> Option<Language> {
    match name {
        "python" => Some(Language::Python),
        "csharp" => Some(Language::Csharp),
        "java" => Some(Language::Java),
        "nodejs" => Some(Language::Nodejs),
        _ => None,
    }
}

fn probe_runtime(registry: &RunnerRegistry, language: Language, entry_file: &str) -> RuntimeCheck {
    let sandbox_root = std::env::temp_dir();
    let parameters = Value::Null;
    let node_env = HashMap::new();
    let ctx = RunnerContext {
        sandbox_root: &sandbox_root,
        entry_file,
        parameters: &parameters,
        node_env: &node_env,
    };

    let detail = match registry.resolve(language).and_then(|runner| runner.build(&ctx)) {
        Ok(cmd) => format!("resolved to {}", cmd.program),
        Err(e) => e.to_string(),
    };
    RuntimeCheck {
        language: language.as_str(),
        available: !detail.starts_with("runtime error"),
        detail,
    }
}

fn check_sandbox_root(root: &Path) -> Result<(), String> {
    std::fs::create_dir_all(root).map_err(|e| format!("cannot create {}: {e}", root.display()))?;
    let probe = root.join(".taskgrid-doctor-probe");
    std::fs::write(&probe, b"ok").map_err(|e| format!("{} is not writable: {e}", root.display()))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

pub fn run(config: OrchestratorConfig) -> Result<()> {
    println!("taskgrid doctor");
    println!("===============");
    println!();

    println!("Configuration:");
    match config.validate() {
        Ok(()) => println!("  OK"),
        Err(e) => println!("  FAILED: {e}"),
    }
    println!();

    println!("Sandbox root ({}):", config.general.sandbox_root.display());
    match check_sandbox_root(&config.general.sandbox_root) {
        Ok(()) => println!("  OK (created/writable)"),
        Err(e) => println!("  FAILED: {e}"),
    }
    println!();

    println!("Language runtimes:");
    let registry = RunnerRegistry::with_defaults();
    let mut all_ok = true;
    for name in &config.general.supported_languages {
        let Some(language) = language_from_str(name) else {
            println!("  {name}: unrecognized language name in config");
            all_ok = false;
            continue;
        };
        let entry_file = match language {
            Language::Python => "main.py",
            Language::Nodejs => "main.js",
            Language::Java => "Main.java",
            Language::Csharp => "Program.cs",
        };
        let check = probe_runtime(&registry, language, entry_file);
        all_ok &= check.available;
        let status = if check.available { "OK" } else { "MISSING" };
        println!("  {}: {status} ({})", check.language, check.detail);
    }
    println!();

    if all_ok {
        println!("All configured runtimes are usable.");
    } else {
        println!("Some runtimes are unavailable; program executions for those languages will fail to dispatch.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_root_check_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sandboxes");
        assert!(!root.exists());
        check_sandbox_root(&root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn sandbox_root_check_fails_on_unwritable_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file can't be used as a directory root.
        let err = check_sandbox_root(file.path()).unwrap_err();
        assert!(err.contains("cannot create") || err.contains("not writable"));
    }

    #[test]
    fn unrecognized_language_name_is_rejected() {
        assert!(language_from_str("cobol").is_none());
        assert!(language_from_str("python").is_some());
    }
}
