use std::io::Write;

use boardsync::infra::session::Session;
use tempfile::NamedTempFile;

fn token_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tmp file");
    file.write_all(contents.as_bytes()).expect("write token");
    file
}

#[test]
fn token_file_wins_over_environment() {
    let file = token_file("  from-file\n");
    let session = Session::from_sources(Some(file.path()), Some("from-env".to_string()))
        .expect("session loads");
    assert_eq!(session.token(), Some("from-file"));
}

#[test]
fn environment_token_is_used_without_a_file() {
    let session = Session::from_sources(None, Some(" env-token ".to_string())).expect("session");
    assert_eq!(session.token(), Some("env-token"));

    let blank = Session::from_sources(None, Some("   ".to_string())).expect("session");
    assert!(!blank.is_authenticated());
}

#[test]
fn empty_or_missing_token_file_is_an_error() {
    let empty = token_file("\n");
    assert!(Session::from_sources(Some(empty.path()), None).is_err());

    let dir = tempfile::tempdir().expect("tmp dir");
    let missing = dir.path().join("absent");
    assert!(Session::from_sources(Some(&missing), None).is_err());
}

#[test]
fn debug_output_hides_the_token() {
    let session = Session::with_token("very-secret");
    assert!(!format!("{session:?}").contains("very-secret"));
}
