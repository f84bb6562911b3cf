//! End-to-end invocation contracts that hold without a browser: every
//! failure answers with a single-line JSON envelope on stdout and exit
//! code 1, and validation rejects bad programs before touching CDP.

use std::process::Command;

use serde_json::Value;

fn run_skill(payload: &str) -> (Value, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_cdp-skill"))
        .arg(payload)
        .output()
        .expect("binary should run");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.trim();
    assert!(
        !line.contains('\n'),
        "response must be a single line, got: {line}"
    );
    let value: Value = serde_json::from_str(line)
        .unwrap_or_else(|e| panic!("stdout must be JSON ({e}): {line}"));
    (value, output.status.code().unwrap_or(-1))
}

#[test]
fn malformed_json_yields_parse_envelope_and_exit_1() {
    let (response, code) = run_skill("{not json");
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"]["type"], "PARSE");
    assert!(response["error"]["message"].as_str().is_some());
    assert_eq!(code, 1);
}

#[test]
fn empty_steps_array_is_validation_error() {
    let (response, code) = run_skill(r#"{"steps":[]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert_eq!(code, 1);
}

#[test]
fn step_with_two_action_keys_names_both() {
    let (response, code) = run_skill(r##"{"steps":[{"click":"#a","snapshot":true}]}"##);
    assert_eq!(response["error"]["type"], "VALIDATION");
    let message = response["error"]["message"].as_str().unwrap();
    assert!(message.contains("click"), "{message}");
    assert!(message.contains("snapshot"), "{message}");
    assert_eq!(code, 1);
}

#[test]
fn step_with_no_action_key_is_rejected() {
    let (response, code) = run_skill(r#"{"steps":[{"optional":true}]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert_eq!(code, 1);
}

#[test]
fn top_level_config_gets_migration_message() {
    let (response, code) = run_skill(r#"{"config":{"port":9222},"steps":[{"snapshot":true}]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("openTab")
    );
    assert_eq!(code, 1);
}

#[test]
fn session_steps_without_tab_are_rejected_up_front() {
    let (response, code) = run_skill(r#"{"steps":[{"snapshot":true}]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert_eq!(code, 1);
}

#[test]
fn unknown_tab_alias_is_rejected_before_any_step() {
    let (response, code) =
        run_skill(r#"{"tab":"t999999999","steps":[{"snapshot":true}]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("t999999999")
    );
    assert_eq!(code, 1);
}

#[test]
fn bad_step_parameters_are_validation_errors() {
    let (response, code) = run_skill(r#"{"steps":[{"setGeolocation":{"latitude":999}}]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert_eq!(code, 1);

    let (response, _) = run_skill(r#"{"steps":[{"goto":{"url":"https://x","waitUntil":"soon"}}]}"#);
    assert_eq!(response["error"]["type"], "VALIDATION");
}

#[test]
fn stdin_payload_is_read_when_no_argument_given() {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new(env!("CARGO_BIN_EXE_cdp-skill"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("binary should run");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(br#"{"steps":[]}"#)
        .unwrap();
    let output = child.wait_with_output().unwrap();

    let response: Value =
        serde_json::from_str(String::from_utf8_lossy(&output.stdout).trim()).unwrap();
    assert_eq!(response["error"]["type"], "VALIDATION");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn empty_stdin_is_a_parse_error() {
    use std::process::Stdio;

    let output = Command::new(env!("CARGO_BIN_EXE_cdp-skill"))
        .stdin(Stdio::null())
        .output()
        .expect("binary should run");
    let response: Value =
        serde_json::from_str(String::from_utf8_lossy(&output.stdout).trim()).unwrap();
    assert_eq!(response["error"]["type"], "PARSE");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn validation_errors_carry_step_index() {
    let (response, _) =
        run_skill(r#"{"steps":[{"chromeStatus":true},{"bogusAction":true}]}"#);
    let message = response["error"]["message"].as_str().unwrap();
    assert!(message.contains("steps[1]"), "{message}");
}
