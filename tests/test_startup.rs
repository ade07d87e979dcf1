//! Integration test: binary startup without a model artifact

use std::net::{TcpListener, TcpStream};
use std::process::Command;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_exits_without_model_and_never_binds() {
    let workdir = tempfile::tempdir().unwrap();
    let port = free_port();

    let output = Command::new(env!("CARGO_BIN_EXE_classify-server"))
        .current_dir(workdir.path())
        .env("HOST", "127.0.0.1")
        .env("PORT", port.to_string())
        .env("DEBUG", "false")
        .env("RUST_LOG", "classify_server=info")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let logs = String::from_utf8_lossy(&output.stdout);
    assert!(logs.contains("Model file not found"), "{logs}");
    assert!(!logs.contains("Server listening"), "{logs}");

    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
}
