//! End-to-end scenarios through the public facade.

use llama_textgen::tiny::write_tiny_model;
use llama_textgen::{
    ChatMessage, ErrorKind, LlamaEngine, NativeEngine, SamplingConfig, SessionHandle, SessionSpec,
};

fn setup() -> (tempfile::TempDir, std::path::PathBuf, NativeEngine) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.gguf");
    write_tiny_model(&path).unwrap();
    (dir, path, NativeEngine::default())
}

/// temperature 0, top-p 1, min-p 0, and all three penalties 0.
fn greedy_completion() -> SamplingConfig {
    SamplingConfig::completion_defaults()
        .with_temperature(0.0)
        .with_top_p(1.0)
        .with_min_p(0.0)
        .with_penalties(0.0, 0.0, 0.0)
}

#[test]
fn empty_model_path_is_rejected() {
    let (_dir, _path, engine) = setup();
    let err = engine
        .create_session(&SessionSpec::new("", 512, 512))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn fresh_session_counts_a_few_tokens() {
    let (_dir, path, engine) = setup();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    let n = engine.count_tokens(h, "Hello").unwrap();
    assert!((1..=3).contains(&n), "{n}");
}

#[test]
fn zero_temperature_completion_is_repeatable() {
    let (_dir, path, engine) = setup();
    let run = || {
        let h = engine
            .create_session(&SessionSpec::new(&path, 512, 512))
            .unwrap();
        let text = engine
            .generate_completion(h, "Hello", &greedy_completion())
            .unwrap();
        engine.release_session(h).unwrap();
        text
    };
    let first = run();
    assert_eq!(first, " world!");
    assert_eq!(first, run());
}

#[test]
fn unused_handle_is_invalid() {
    let (_dir, _path, engine) = setup();
    let err = engine
        .generate_chat(
            SessionHandle::new(9999),
            &[ChatMessage::user("Hello")],
            &SamplingConfig::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
}

#[test]
fn repeated_completions_end_in_context_overflow() {
    let (_dir, path, engine) = setup();
    let h = engine
        .create_session(&SessionSpec::new(&path, 32, 32))
        .unwrap();
    let mut successes = 0;
    let err = loop {
        match engine.generate_completion(h, "Hello", &greedy_completion()) {
            Ok(_) => successes += 1,
            Err(e) => break e,
        }
        assert!(successes < 100, "context never filled");
    };
    assert_eq!(err.kind(), ErrorKind::ContextOverflow);
    assert!(successes > 1);
}

#[test]
fn released_session_cannot_count() {
    let (_dir, path, engine) = setup();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    engine.release_session(h).unwrap();
    assert_eq!(
        engine.count_tokens(h, "x").unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    assert_eq!(
        engine.release_session(h).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
}

#[test]
fn template_output_is_stable() {
    let (_dir, path, engine) = setup();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    let messages = vec![
        ChatMessage::system("You are terse."),
        ChatMessage::user("Hello"),
        ChatMessage::assistant("Hi there!"),
        ChatMessage::user("Hello"),
    ];
    let a = engine.apply_template(h, &messages).unwrap();
    let b = engine.apply_template(h, &messages).unwrap();
    assert_eq!(a, b);
    assert!(a.ends_with("<|im_start|>assistant\n"));
}
