//! Integration test suite for `jr` CLI
use assert_cmd::Command;

/// Helper function to run the `main` binary with the given arguments and
/// return a [`assert_cmd::assert::Assert`].
fn run_main(args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("jr").expect("Failed to find main binary");
    cmd.args(args);
    cmd.assert()
}

/// Runs `jr` with `stdin` piped in.
fn run_with_stdin(args: &[&str], stdin: &str) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("jr").expect("Failed to find main binary");
    cmd.args(args).write_stdin(stdin);
    cmd.assert()
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone())
        .expect("Invalid UTF-8 output")
}

fn stderr_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stderr.clone())
        .expect("Invalid UTF-8 output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tokens_of_simple_document() {
        let assert =
            run_main(&["tokens", "tests/data/simple.json"]).success().code(0);
        let output_str = stdout_of(&assert);
        let lines: Vec<&str> = output_str.lines().collect();
        assert_eq!(
            lines,
            [
                "1:1\t[\t[",
                "1:2\tinteger\t1",
                "1:3\t,\t,",
                "1:4\tinteger\t2",
                "1:5\t,\t,",
                "1:6\tinteger\t3",
                "1:7\t]\t]",
                "2:1\tend of document\t",
            ]
        );
    }

    #[test]
    fn tokens_from_stdin() {
        let assert =
            run_with_stdin(&["tokens"], "{\"a\": \"x\\ny\"}").success();
        let output_str = stdout_of(&assert);
        let mut lines = output_str.lines();
        assert_eq!(lines.next(), Some("1:1\t{\t{"));
        assert_eq!(lines.next(), Some("1:2\tstring\t\"a\""));
        assert_eq!(lines.next(), Some("1:5\t:\t:"));
        // string tokens print as written, escapes included
        assert_eq!(lines.next(), Some("1:7\tstring\t\"x\\ny\""));
        assert_eq!(lines.next(), Some("1:13\t}\t}"));
        assert_eq!(lines.next(), Some("1:14\tend of document\t"));
    }

    #[test]
    fn graph_marks_shared_aggregates() {
        let assert =
            run_main(&["graph", "--compact", "tests/data/shared.json"])
                .success();
        assert_eq!(
            stdout_of(&assert),
            "{\"items\":#1 [1,2],\
             \"child\":{\"child\":null,\"items\":<ref #1>}}\n"
        );
    }

    #[test]
    fn graph_prints_cycles_once() {
        let assert = run_main(&["graph", "tests/data/cycle.json"]).success();
        let output_str = stdout_of(&assert);
        assert_eq!(output_str.matches("<ref #1>").count(), 1, "{output_str}");
        assert_eq!(output_str.matches("<ref #2>").count(), 1, "{output_str}");
        assert!(
            output_str.starts_with("#1 {\n  \"name\": \"A\""),
            "{output_str}"
        );
    }

    #[test]
    fn graph_depth() {
        let assert = run_main(&[
            "graph",
            "--depth",
            "--compact",
            "tests/data/shared.json",
        ])
        .success();
        let output_str = stdout_of(&assert);
        assert_eq!(output_str.lines().next(), Some("Depth: 3"));
    }

    #[test]
    fn nonexistent_file() {
        let assert = run_main(&["graph", "tests/data/does-not-exist.json"]);
        assert.failure();
    }

    #[test]
    fn malformed_document() {
        let assert =
            run_with_stdin(&["graph"], "{\"a\": [1, 2}").failure().code(1);
        assert!(stderr_of(&assert).contains("Failed to deserialize document"));

        let assert = run_main(&["graph", "tests/data/ref_not_exclusive.json"])
            .failure()
            .code(1);
        assert!(stderr_of(&assert).contains("`$ref`"));

        let assert = run_main(&["graph", "tests/data/unresolved.json"])
            .failure()
            .code(1);
        assert!(stderr_of(&assert).contains("unresolved reference"));
    }

    #[test]
    fn buffer_size_limits() {
        run_main(&["tokens", "--buffer-size", "8", "tests/data/simple.json"])
            .failure()
            .code(1);

        let long = format!("[\"{}\"]", "x".repeat(40));
        let assert = run_with_stdin(&["graph", "--buffer-size", "32"], &long)
            .failure()
            .code(1);
        assert!(stderr_of(&assert).contains("too small"));

        let assert = run_with_stdin(
            &["graph", "--compact", "--buffer-size", "64"],
            &long,
        )
        .success();
        assert_eq!(stdout_of(&assert), format!("{long}\n"));
    }

    #[test]
    fn custom_metadata_keys_from_config() {
        let mut config =
            tempfile::NamedTempFile::new().expect("create temp file");
        write!(config, r#"{{"metadata": {{"id": "@id", "ref": "@ref"}}}}"#)
            .expect("write settings");
        let path = config.path().to_str().expect("utf-8 temp path");

        let assert = run_main(&[
            "graph",
            "--compact",
            "--config",
            path,
            "tests/data/custom_keys.json",
        ])
        .success();
        assert_eq!(stdout_of(&assert), "{\"a\":#1 [true],\"b\":<ref #1>}\n");
    }

    #[test]
    fn invalid_config() {
        let mut config =
            tempfile::NamedTempFile::new().expect("create temp file");
        write!(config, r#"{{"buffer_size": 4}}"#).expect("write settings");
        let path = config.path().to_str().expect("utf-8 temp path");
        run_main(&["graph", "--config", path, "tests/data/simple.json"])
            .failure()
            .code(1);
    }
}
