//! End-to-end CLI tests against the built `curlkit` binary.

mod common;

use common::curlkit_cmd;
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn run_prints_response_body_to_stdout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    curlkit_cmd()
        .arg("run")
        .arg("--")
        .arg(format!("{}/ping", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("pong"));
}

#[tokio::test]
async fn run_writes_response_body_to_output_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(ResponseTemplate::new(200).set_body_string("saved"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.txt");

    curlkit_cmd()
        .arg("--output")
        .arg(&out_path)
        .arg("run")
        .arg("--")
        .arg(format!("{}/file", server.uri()))
        .assert()
        .success();

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "saved");
}

#[tokio::test]
async fn run_silent_suppresses_stdout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quiet"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hidden"))
        .mount(&server)
        .await;

    curlkit_cmd()
        .arg("--silent")
        .arg("run")
        .arg("--")
        .arg(format!("{}/quiet", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[tokio::test]
async fn run_with_var_substitutes_into_the_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/widgets/7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("widget-7"))
        .mount(&server)
        .await;

    curlkit_cmd()
        .arg("--var")
        .arg(format!("HOST={}", server.uri()))
        .arg("--var")
        .arg("ID=7")
        .arg("run")
        .arg("--")
        .arg("${HOST}/widgets/${ID}")
        .assert()
        .success()
        .stdout(predicate::str::contains("widget-7"));
}

#[tokio::test]
async fn run_exits_2_on_server_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    curlkit_cmd()
        .arg("run")
        .arg("--")
        .arg(format!("{}/broken", server.uri()))
        .assert()
        .code(2);
}

#[test]
fn run_exits_1_on_malformed_url() {
    curlkit_cmd()
        .arg("run")
        .arg("--")
        .arg("not a valid url")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn json_errors_flag_emits_structured_error_on_stderr() {
    curlkit_cmd()
        .arg("--json-errors")
        .arg("run")
        .arg("--")
        .arg("not a valid url")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("\"kind\""));
}

#[tokio::test]
async fn from_file_executes_a_saved_command_script() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scripted"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ran"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("request.curl");
    std::fs::write(&script_path, format!("curl {}/scripted\n", server.uri())).unwrap();

    curlkit_cmd()
        .arg("from-file")
        .arg(&script_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ran"));
}

#[tokio::test]
async fn embedded_output_flag_writes_to_file_instead_of_stdout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/embedded-file"))
        .respond_with(ResponseTemplate::new(200).set_body_string("embedded"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("embedded.txt");

    curlkit_cmd()
        .arg("run")
        .arg("--")
        .arg("-o")
        .arg(&out_path)
        .arg(format!("{}/embedded-file", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "embedded");
}

#[tokio::test]
async fn embedded_silent_flag_suppresses_stdout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/embedded-quiet"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hush"))
        .mount(&server)
        .await;

    curlkit_cmd()
        .arg("run")
        .arg("--")
        .arg("-s")
        .arg(format!("{}/embedded-quiet", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[tokio::test]
async fn include_flag_prepends_status_line_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/with-headers"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body-only"))
        .mount(&server)
        .await;

    curlkit_cmd()
        .arg("run")
        .arg("--")
        .arg("-i")
        .arg(format!("{}/with-headers", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("HTTP/1.1 200"))
        .stdout(predicate::str::contains("body-only"));
}
