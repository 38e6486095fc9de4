mod common;
mod utils;

use anyhow::Result;
use common::TestEnvironment;

const COMPLETE: &str = "0\t1.5\thttps://cdn.example.com/a.mp4\t10\t11.5\n\
                        1.5\t2\thttps://cdn.example.com/b.mp4\t3\t3.5\n\
                        00:00:02.000\t00:00:04.000\thttps://cdn.example.com/a.mp4\t20\t22\n";

#[test]
fn test_check_reports_statistics() -> Result<()> {
    let env = TestEnvironment::new()?;
    let file = env.write("output.mp4.txt", COMPLETE)?;

    let output = utils::run_beatcut_command(&env, &["mappings", "check", file.to_str().unwrap()])?;
    assert_eq!(output.exit_code, 0, "Check failed: {}", output.stderr);
    assert!(output.stdout.contains("3 mapping(s)"), "{}", output.stdout);
    assert!(output.stdout.contains("2 source(s)"), "{}", output.stdout);
    assert!(!output.stdout.contains("incomplete"));

    Ok(())
}

#[test]
fn test_check_json_output() -> Result<()> {
    let env = TestEnvironment::new()?;
    let file = env.write("output.mp4.txt", "0\t1\n1\t2\tclip\n")?;

    let output = utils::run_beatcut_command(
        &env,
        &["--json", "mappings", "check", file.to_str().unwrap()],
    )?;
    assert_eq!(output.exit_code, 0, "Check failed: {}", output.stderr);

    let events = utils::json_events(&output.stdout);
    let valid = events
        .iter()
        .find(|e| e["code"] == "montage.mappings.valid")
        .expect("missing validation event");
    assert_eq!(valid["data"]["count"], 2);
    assert_eq!(valid["data"]["resolved"], 0);
    assert_eq!(valid["data"]["complete"], false);

    Ok(())
}

#[test]
fn test_check_rejects_malformed_rows() -> Result<()> {
    let env = TestEnvironment::new()?;
    let file = env.write("broken.txt", "0\t1\n1\tsoon\n")?;

    let output = utils::run_beatcut_command(&env, &["mappings", "check", file.to_str().unwrap()])?;
    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("broken.txt:2"), "{}", output.stderr);

    Ok(())
}

#[test]
fn test_check_missing_file_fails() -> Result<()> {
    let env = TestEnvironment::new()?;

    let output = utils::run_beatcut_command(&env, &["mappings", "check", "nope.txt"])?;
    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("does not exist"), "{}", output.stderr);

    Ok(())
}

#[test]
fn test_srt_export() -> Result<()> {
    let env = TestEnvironment::new()?;
    let file = env.write("output.mp4.txt", COMPLETE)?;

    let output = utils::run_beatcut_command(&env, &["mappings", "srt", file.to_str().unwrap()])?;
    assert_eq!(output.exit_code, 0, "Export failed: {}", output.stderr);

    let srt = utils::read_file(&env.file("output.mp4.srt"))?;
    assert!(srt.starts_with("1\n00:00:00.000 --> 00:00:01.500\n"));
    assert!(srt.contains("3\n00:00:02.000 --> 00:00:04.000\n"));

    Ok(())
}

#[test]
fn test_derive_to_stdout() -> Result<()> {
    let env = TestEnvironment::new()?;
    let points = env.write("beats.txt", "# onsets\n1.0 2.0\n3.0\n")?;

    let output = utils::run_beatcut_command(
        &env,
        &[
            "mappings",
            "derive",
            "--points",
            points.to_str().unwrap(),
            "--duration",
            "4",
        ],
    )?;
    assert_eq!(output.exit_code, 0, "Derive failed: {}", output.stderr);

    let rows: Vec<&str> = output.stdout.lines().collect();
    assert_eq!(
        rows,
        vec![
            "00:00:00.000\t00:00:01.000",
            "00:00:01.000\t00:00:02.000",
            "00:00:02.000\t00:00:03.000",
            "00:00:03.000\t00:00:04.000",
        ]
    );

    Ok(())
}

#[test]
fn test_derive_applies_policy() -> Result<()> {
    let env = TestEnvironment::new()?;
    let points = env.write("beats.txt", "0.5, 1.0, 1.1, 2.0, 3.0")?;
    let out = env.file("derived.txt");

    let output = utils::run_beatcut_command(
        &env,
        &[
            "mappings",
            "derive",
            "--points",
            points.to_str().unwrap(),
            "--duration",
            "0:04",
            "--output-length",
            "2.5",
            "--min-interval",
            "0.3",
            "-o",
            out.to_str().unwrap(),
        ],
    )?;
    assert_eq!(output.exit_code, 0, "Derive failed: {}", output.stderr);

    let check = utils::run_beatcut_command(&env, &["mappings", "check", out.to_str().unwrap()])?;
    assert_eq!(check.exit_code, 0, "Check failed: {}", check.stderr);

    let saved = utils::read_file(&out)?;
    let last = saved.lines().last().unwrap_or_default();
    assert!(last.ends_with("00:00:02.500"), "{saved}");
    assert!(!saved.contains("00:00:01.100"), "{saved}");

    Ok(())
}

#[test]
fn test_config_is_created_with_defaults() -> Result<()> {
    let env = TestEnvironment::new()?;

    let output = utils::run_beatcut_command(&env, &["config"])?;
    assert_eq!(output.exit_code, 0, "Config failed: {}", output.stderr);
    assert!(output.stdout.contains("retries = 100"), "{}", output.stdout);

    let path = env.config_home().join("beatcut").join("config.toml");
    assert!(path.exists());

    Ok(())
}
