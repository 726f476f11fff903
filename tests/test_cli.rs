use assert_cmd::Command;
use std::fs;
use tempfile::NamedTempFile;

const TYPES: &str = r#"[
    {"name": "File", "move_only": true},
    {"name": "Bool"}
]"#;

fn module(functions: &str) -> String {
    format!(r#"{{"types": {}, "functions": [{}]}}"#, TYPES, functions)
}

fn write_module(text: &str) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    fs::write(&file, text).unwrap();
    file
}

fn run(file: &NamedTempFile, extra: &[&str]) -> std::process::Output {
    let mut cmd = Command::cargo_bin("moveonly-checker").unwrap();
    cmd.arg(file.path());
    cmd.args(extra);
    cmd.output().unwrap()
}

const CLOSE_ONCE: &str = r#"{
    "name": "close_once",
    "arguments": [{"name": "f", "type": "File", "convention": "owned"}],
    "blocks": [{
        "label": "entry",
        "instructions": [
            {"op": "mark", "result": "m", "operand": "f", "line": 2},
            {"op": "apply", "function": "close", "args": [["m", "owned"]], "line": 3}
        ],
        "terminator": {"op": "return", "line": 4}
    }]
}"#;

const CLOSE_TWICE: &str = r#"{
    "name": "close_twice",
    "arguments": [{"name": "f", "type": "File", "convention": "owned"}],
    "blocks": [{
        "label": "entry",
        "instructions": [
            {"op": "mark", "result": "m", "operand": "f", "line": 10},
            {"op": "apply", "function": "close", "args": [["m", "owned"]], "line": 11},
            {"op": "apply", "function": "close", "args": [["m", "owned"]], "line": 12}
        ],
        "terminator": {"op": "return", "line": 13}
    }]
}"#;

const CLOSE_SOMETIMES: &str = r#"{
    "name": "close_sometimes",
    "arguments": [
        {"name": "f", "type": "File", "convention": "owned"},
        {"name": "c", "type": "Bool", "convention": "guaranteed"}
    ],
    "blocks": [
        {
            "label": "entry",
            "instructions": [{"op": "mark", "result": "m", "operand": "f", "line": 20}],
            "terminator": {"op": "cond_branch", "condition": "c", "then": "left", "else": "right", "line": 21}
        },
        {
            "label": "left",
            "instructions": [{"op": "destroy_value", "operand": "m", "line": 22}],
            "terminator": {"op": "return", "line": 23}
        },
        {
            "label": "right",
            "terminator": {"op": "return", "line": 24}
        }
    ]
}"#;

#[test]
fn test_clean_module_passes() {
    let file = write_module(&module(CLOSE_ONCE));
    let output = run(&file, &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {}", stdout);
    assert!(stdout.contains("no violations found"), "stdout: {}", stdout);
}

#[test]
fn test_double_consume_fails() {
    let file = write_module(&module(CLOSE_TWICE));
    let output = run(&file, &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!output.status.success());
    assert!(stdout.contains("Found 1 violation(s)"), "stdout: {}", stdout);
    assert!(stdout.contains("moveonly::double_consume"), "stdout: {}", stdout);
    assert!(stdout.contains("close_twice:12:0"), "stdout: {}", stdout);
}

#[test]
fn test_missing_consume_on_one_path() {
    let file = write_module(&module(CLOSE_SOMETIMES));
    let output = run(&file, &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!output.status.success());
    assert!(stdout.contains("moveonly::missing_consume"), "stdout: {}", stdout);
    assert!(stdout.contains("close_sometimes:20:0"), "stdout: {}", stdout);
}

#[test]
fn test_json_output() {
    let functions = format!("{},{}", CLOSE_ONCE, CLOSE_TWICE);
    let file = write_module(&module(&functions));
    let output = run(&file, &["--format", "json"]);
    assert!(!output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["diagnostic_count"], 1);
    let functions = report["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0]["function"], "close_once");
    assert_eq!(functions[0]["diagnostics"].as_array().unwrap().len(), 0);
    assert_eq!(functions[1]["diagnostics"][0]["kind"], "double_consume");
    assert_eq!(functions[1]["diagnostics"][0]["value_name"], "m");
}

#[test]
fn test_single_function_selected() {
    let functions = format!("{},{}", CLOSE_ONCE, CLOSE_TWICE);
    let file = write_module(&module(&functions));

    let output = run(&file, &["--function", "close_once"]);
    assert!(output.status.success());

    let output = run(&file, &["--function", "close_twice"]);
    assert!(!output.status.success());
}

#[test]
fn test_unknown_function_is_an_error() {
    let file = write_module(&module(CLOSE_ONCE));
    let output = run(&file, &["--function", "missing"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("missing"), "stderr: {}", stderr);
}

#[test]
fn test_disabled_checker_reports_nothing() {
    let file = write_module(&module(CLOSE_TWICE));
    let output = run(&file, &["--disable-move-only"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {}", stdout);
    assert!(stdout.contains("no violations found"));
}

#[test]
fn test_config_in_module_file() {
    let text = format!(
        r#"{{"config": {{"move_only_enabled": false}}, "types": {}, "functions": [{}]}}"#,
        TYPES, CLOSE_TWICE
    );
    let file = write_module(&text);
    let output = run(&file, &[]);
    assert!(output.status.success());
}

#[test]
fn test_verbose_lists_functions() {
    let file = write_module(&module(CLOSE_ONCE));
    let output = run(&file, &["-v"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("close_once"), "stdout: {}", stdout);
    assert!(stdout.contains("0 diagnostic(s)"), "stdout: {}", stdout);
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_module("{ not json");
    let output = run(&file, &[]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("Error"), "stderr: {}", stderr);
}

#[test]
fn test_missing_file_is_an_error() {
    let path = std::env::temp_dir().join(format!("moveonly_missing_{}.json", rand::random::<u32>()));
    let mut cmd = Command::cargo_bin("moveonly-checker").unwrap();
    cmd.arg(&path);
    let output = cmd.output().unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_unknown_format_is_rejected() {
    let file = write_module(&module(CLOSE_ONCE));
    let output = run(&file, &["--format", "xml"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("unknown output format"), "stderr: {}", stderr);
}
