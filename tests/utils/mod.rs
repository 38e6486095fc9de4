use anyhow::Result;
use std::fs;
use std::path::Path;
use std::process::Command;

use super::common::TestEnvironment;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run the beatcut binary inside the test environment
pub fn run_beatcut_command(env: &TestEnvironment, args: &[&str]) -> Result<CommandOutput> {
    let output = Command::new(env!("CARGO_BIN_EXE_beatcut"))
        .args(args)
        .current_dir(env.path())
        .env("XDG_CONFIG_HOME", env.config_home())
        .env("NO_COLOR", "1")
        .output()?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

pub fn read_file(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}

/// Parse JSON event lines, skipping anything that is not an object
pub fn json_events(output: &str) -> Vec<serde_json::Value> {
    output
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|value| value.is_object())
        .collect()
}
