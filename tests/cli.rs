use std::env;
use std::fs;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Duration;

mod util;
pub use util::*;

const KEYSUB: &str = env!("CARGO_BIN_EXE_keysub");

#[test]
fn exits_with_an_error_when_no_endpoint_is_reachable() {
    let output = Command::new(KEYSUB)
        .args(&["--connect", &unreachable_endpoint(), "--timeout-ms", "500"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("keysub: cannot connect to any endpoint"), "{}", stderr);
}

#[test]
fn exits_with_an_error_on_invalid_key_expressions() {
    let router = util::router();
    let output = Command::new(KEYSUB)
        .args(&["-e", &router.endpoint().to_string(), "--key", "mqtt//demo"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("keysub: invalid key expression"), "{}", stderr);
}

#[test]
fn exits_with_an_error_on_malformed_endpoints() {
    let output = Command::new(KEYSUB)
        .args(&["--connect", "quic/localhost:7447"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn exits_with_an_error_when_the_router_drops_the_session() {
    let router = util::router();
    let config = env::temp_dir().join(format!("keysub-cli-{}.json", router.address().port()));
    fs::write(
        &config,
        format!(
            r#"{{"connect": {{"endpoints": ["{}"], "timeout_ms": 2000}}, "name": "cli-test"}}"#,
            router.endpoint()
        ),
    )
    .unwrap();

    let mut child = Command::new(KEYSUB)
        .arg("--config")
        .arg(&config)
        .args(&["--key", "mqtt/demo/**"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || router.subscription_count() == 1));
    router.publish("mqtt/demo/sensor/temp", "21.5");

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "\u{2713} [mqtt/demo/sensor/temp]: 21.5\n");

    router.disconnect_all();
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(1));

    fs::remove_file(&config).ok();
}

#[cfg(unix)]
#[test]
fn interrupt_exits_cleanly() {
    let router = util::router();
    let mut child = Command::new(KEYSUB)
        .args(&["--connect", &router.endpoint().to_string()])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    assert!(wait_until(Duration::from_secs(10), || router.subscription_count() == 1));
    router.publish("other/topic", "ignored");
    router.publish("mqtt/demo/sensor/temp", "21.5");

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "\u{2713} [mqtt/demo/sensor/temp]: 21.5\n");

    #[allow(unsafe_code)]
    let res = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    assert_eq!(res, 0);

    let status = child.wait().unwrap();
    assert!(status.success(), "{:?}", status);
    assert!(wait_until(DELIVERY_TIMEOUT, || router.client_count() == 0));
}
