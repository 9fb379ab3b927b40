//! Integration tests for the native engine over the tiny demo model.
//!
//! Validates:
//! - Session creation failures (argument, model load, KV allocation)
//! - Token counting and the BOS rule
//! - Template rendering purity
//! - Chat and completion stopping policies
//! - KV cache accumulation until context overflow
//! - Release semantics, handle uniqueness and model sharing
//! - Concurrency on one handle and across handles
//! - Telemetry reports

use std::sync::Arc;
use std::thread;

use llama_engine::{
    ChatMessage, ErrorKind, LlamaEngine, LlamaError, SamplingConfig, SessionHandle, SessionSpec,
};
use llama_models::tiny::write_tiny_model;
use llama_models::Model;
use llama_runtime::{
    completion_chain, CallKind, EngineConfig, GenerationLimits, GenerationLoop, LogTelemetry,
    LoopState, NativeEngine, NoopTelemetry, Session,
};

fn tiny_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.gguf");
    write_tiny_model(&path).unwrap();
    (dir, path)
}

fn greedy() -> SamplingConfig {
    SamplingConfig::greedy()
}

// ===========================================================================
// createSession
// ===========================================================================

#[test]
fn empty_model_path_is_invalid_argument() {
    let engine = NativeEngine::default();
    let err = engine
        .create_session(&SessionSpec::new("", 512, 512))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(engine.table().is_empty());
}

#[test]
fn missing_or_junk_model_is_model_load_error() {
    let engine = NativeEngine::default();
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("nope.gguf");
    let err = engine
        .create_session(&SessionSpec::new(&missing, 512, 512))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoad);

    let junk = dir.path().join("junk.gguf");
    std::fs::write(&junk, b"definitely not a model").unwrap();
    let err = engine
        .create_session(&SessionSpec::new(&junk, 512, 512))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoad);
}

#[test]
fn unallocatable_context_is_session_init_error() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let err = engine
        .create_session(&SessionSpec::new(&path, usize::MAX / 2, 512))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionInit);
    assert!(engine.table().is_empty());
}

#[test]
fn batch_size_is_clamped_to_context() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 16, 4096))
        .unwrap();
    let n_batch = engine.table().with_session(h, |s| Ok(s.n_batch())).unwrap();
    assert_eq!(n_batch, 16);
}

// ===========================================================================
// countTokens / applyTemplate
// ===========================================================================

#[test]
fn count_tokens_matches_tokenize() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();

    for text in ["Hello", "Hello world", "la la", "ü", "<|im_start|>user"] {
        let counted = engine.count_tokens(h, text).unwrap();
        assert_eq!(counted, engine.tokenize(h, text).unwrap().len(), "{text:?}");
    }
    // BOS + ▁Hello
    assert_eq!(engine.count_tokens(h, "Hello").unwrap(), 2);
}

#[test]
fn bos_is_counted_only_on_a_fresh_session() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    assert_eq!(engine.count_tokens(h, "Hello").unwrap(), 2);
    engine.generate_completion(h, "Hello", &greedy()).unwrap();
    assert_eq!(engine.count_tokens(h, "Hello").unwrap(), 1);
}

#[test]
fn empty_text_on_a_used_session_is_tokenization_error() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    engine.generate_completion(h, "Hello", &greedy()).unwrap();

    let err = engine.count_tokens(h, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tokenization);
    let err = engine.generate_completion(h, "", &greedy()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tokenization);
}

#[test]
fn apply_template_is_pure() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    let messages = [ChatMessage::system("Be brief."), ChatMessage::user("Hello")];

    let a = engine.apply_template(h, &messages).unwrap();
    let b = engine.apply_template(h, &messages).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        a,
        "<|im_start|>system\nBe brief.<|im_end|>\n<|im_start|>user\nHello<|im_end|>\n<|im_start|>assistant\n"
    );
    assert_eq!(engine.used_cells(h).unwrap(), 0);
}

#[test]
fn template_larger_than_context_buffer_still_renders() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 4, 4))
        .unwrap();
    let long = "Hello ".repeat(20);
    let out = engine
        .apply_template(h, &[ChatMessage::user(long.clone())])
        .unwrap();
    assert!(out.contains(&long));
}

#[test]
fn empty_message_list_is_template_error() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    assert_eq!(
        engine.apply_template(h, &[]).unwrap_err().kind(),
        ErrorKind::Template
    );
    assert_eq!(
        engine.generate_chat(h, &[], &greedy()).unwrap_err().kind(),
        ErrorKind::Template
    );
}

// ===========================================================================
// Generation
// ===========================================================================

#[test]
fn greedy_completion_is_deterministic() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let sampling = SamplingConfig::completion_defaults().with_temperature(0.0);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let h = engine
            .create_session(&SessionSpec::new(&path, 512, 512))
            .unwrap();
        outputs.push(engine.generate_completion(h, "Hello", &sampling).unwrap());
        // BOS, ▁Hello, ▁world, !; the final </s> is sampled but never decoded.
        assert_eq!(engine.used_cells(h).unwrap(), 4);
        engine.release_session(h).unwrap();
    }
    assert_eq!(outputs[0], " world!");
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn chat_stops_on_end_of_generation() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    let messages = [ChatMessage::user("Hello")];
    let prompt_len = engine
        .tokenize(h, &engine.apply_template(h, &messages).unwrap())
        .unwrap()
        .len();

    let reply = engine
        .generate_chat(h, &messages, &SamplingConfig::default())
        .unwrap();
    assert_eq!(reply, "Hi there!");
    assert_eq!(engine.used_cells(h).unwrap(), prompt_len + 3);
}

#[test]
fn seeded_chat_is_reproducible() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let sampling = SamplingConfig::default().with_seed(42).with_top_p(1.0);
    let mut replies = Vec::new();
    for _ in 0..2 {
        let h = engine
            .create_session(&SessionSpec::new(&path, 512, 512))
            .unwrap();
        replies.push(
            engine
                .generate_chat(h, &[ChatMessage::user("Hello")], &sampling)
                .unwrap(),
        );
    }
    assert_eq!(replies[0], replies[1]);
}

#[test]
fn completion_stops_at_token_budget() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    let out = engine.generate_completion(h, "la", &greedy()).unwrap();
    assert_eq!(out, " la".repeat(32));
    // BOS, ▁la, then 31 fed-back tokens; the 32nd is emitted only.
    assert_eq!(engine.used_cells(h).unwrap(), 2 + 31);
}

#[test]
fn completion_budget_is_configurable() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::new(EngineConfig::default().with_limits(GenerationLimits {
        max_piece_bytes: 256,
        completion_extra_tokens: 3,
    }));
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    assert_eq!(
        engine.generate_completion(h, "la", &greedy()).unwrap(),
        " la la la"
    );
}

#[test]
fn disabled_repeat_penalty_keeps_the_scripted_continuation() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    for repeat in [0.0, -1.0] {
        let sampling = greedy().with_top_p(1.0).with_min_p(0.0).with_penalties(repeat, 0.0, 0.0);
        let h = engine
            .create_session(&SessionSpec::new(&path, 512, 512))
            .unwrap();
        assert_eq!(
            engine.generate_completion(h, "la la", &sampling).unwrap(),
            " la".repeat(32),
            "repeat = {repeat}"
        );
        let h = engine
            .create_session(&SessionSpec::new(&path, 512, 512))
            .unwrap();
        assert_eq!(
            engine.generate_completion(h, "Hello", &sampling).unwrap(),
            " world!"
        );
    }
}

#[test]
fn non_finite_sampling_is_invalid_argument() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();

    let err = engine
        .generate_completion(h, "Hello", &greedy().with_temperature(f32::NAN))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = engine
        .generate_chat(
            h,
            &[ChatMessage::user("Hello")],
            &SamplingConfig::default().with_top_p(f32::INFINITY),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Rejected before the cache was touched.
    assert_eq!(engine.used_cells(h).unwrap(), 0);
    assert_eq!(
        engine.generate_completion(h, "Hello", &greedy()).unwrap(),
        " world!"
    );
}

fn direct_session(path: &std::path::Path) -> Session {
    let model = Arc::new(Model::load(path).unwrap());
    Session::new(
        SessionHandle::new(1),
        model,
        path.to_path_buf(),
        &SessionSpec::new(path, 64, 64),
    )
    .unwrap()
}

#[test]
fn generation_loop_reports_its_final_state() {
    let (_dir, path) = tiny_path();
    let limits = GenerationLimits::default();

    let mut session = direct_session(&path);
    let prompt = session.tokenize("Hello").unwrap();
    let mut generation = GenerationLoop::new(
        &mut session,
        completion_chain(&greedy()),
        CallKind::Completion,
        &limits,
    );
    assert_eq!(generation.state(), LoopState::Priming);
    let out = generation.run(&prompt, Arc::new(NoopTelemetry)).unwrap();
    assert_eq!(out, " world!");
    assert_eq!(generation.state(), LoopState::Done);
    assert_eq!(generation.emitted(), 2);

    let err = generation
        .run(&prompt, Arc::new(NoopTelemetry))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Generation);
    assert_eq!(generation.state(), LoopState::Done);

    let mut session = direct_session(&path);
    let prompt = session.tokenize("zzz").unwrap();
    let mut generation = GenerationLoop::new(
        &mut session,
        completion_chain(&greedy()),
        CallKind::Completion,
        &limits,
    );
    generation
        .run(&prompt, Arc::new(NoopTelemetry))
        .unwrap_err();
    assert_eq!(generation.state(), LoopState::Failed);
    assert_eq!(generation.emitted(), 0);
}

#[test]
fn immediate_end_of_generation_is_generation_error() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    let err = engine.generate_completion(h, "zzz", &greedy()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Generation);
}

#[test]
fn oversized_piece_is_detokenization_error() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::new(EngineConfig::default().with_limits(GenerationLimits {
        max_piece_bytes: 4,
        completion_extra_tokens: 32,
    }));
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    // " world" is six bytes.
    let err = engine.generate_completion(h, "Hello", &greedy()).unwrap_err();
    assert!(matches!(err, LlamaError::Detokenization { .. }), "{err}");
}

// ===========================================================================
// Context overflow
// ===========================================================================

#[test]
fn repeated_completions_accumulate_until_overflow() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 16, 16))
        .unwrap();

    // 4 cells for the first call, 3 for each later one (no BOS).
    let mut expected_used = 4;
    for _ in 0..5 {
        assert_eq!(
            engine.generate_completion(h, "Hello", &greedy()).unwrap(),
            " world!"
        );
        assert_eq!(engine.used_cells(h).unwrap(), expected_used);
        expected_used += 3;
    }

    let err = engine.generate_completion(h, "Hello", &greedy()).unwrap_err();
    assert_eq!(
        err,
        LlamaError::ContextOverflow {
            used: 16,
            pending: 1,
            capacity: 16
        }
    );
    // The session stays usable for non-decoding calls.
    assert_eq!(engine.count_tokens(h, "Hello").unwrap(), 1);
}

#[test]
fn prompt_longer_than_context_is_never_truncated() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 8, 8))
        .unwrap();
    let prompt = ["Hello world"; 5].join(" ");
    assert_eq!(engine.count_tokens(h, &prompt).unwrap(), 11);

    // The first 8-token chunk fits; the remaining 3 do not.
    let err = engine.generate_completion(h, &prompt, &greedy()).unwrap_err();
    assert_eq!(
        err,
        LlamaError::ContextOverflow {
            used: 8,
            pending: 3,
            capacity: 8
        }
    );
    assert_eq!(engine.used_cells(h).unwrap(), 8);
}

#[test]
fn overflow_mid_generation_keeps_partial_cache() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 8, 8))
        .unwrap();
    let err = engine.generate_completion(h, "la", &greedy()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextOverflow);
    assert_eq!(engine.used_cells(h).unwrap(), 8);
}

#[test]
fn second_chat_overflows_small_context() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 16, 16))
        .unwrap();
    let messages = [ChatMessage::user("Hello")];
    assert_eq!(
        engine.generate_chat(h, &messages, &greedy()).unwrap(),
        "Hi there!"
    );
    let err = engine.generate_chat(h, &messages, &greedy()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextOverflow);
}

// ===========================================================================
// Release and handles
// ===========================================================================

#[test]
fn unknown_handle_is_invalid_handle() {
    let engine = NativeEngine::default();
    let h = 9999u64.into();
    let err = engine
        .generate_chat(h, &[ChatMessage::user("Hello")], &greedy())
        .unwrap_err();
    assert_eq!(err, LlamaError::InvalidHandle(h));
    assert_eq!(engine.release_session(h).unwrap_err().kind(), ErrorKind::InvalidHandle);
}

#[test]
fn released_handle_is_dead() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();
    engine.release_session(h).unwrap();

    assert_eq!(engine.count_tokens(h, "x").unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(
        engine.apply_template(h, &[ChatMessage::user("x")]).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    assert_eq!(
        engine.generate_completion(h, "x", &greedy()).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    assert_eq!(engine.release_session(h).unwrap_err().kind(), ErrorKind::InvalidHandle);
}

#[test]
fn handles_are_never_reused() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let spec = SessionSpec::new(&path, 64, 64);
    let a = engine.create_session(&spec).unwrap();
    engine.release_session(a).unwrap();
    let b = engine.create_session(&spec).unwrap();
    assert!(b.raw() > a.raw());
    assert_eq!(engine.table().handles(), vec![b]);
}

#[test]
fn sessions_share_one_model_per_path() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let spec = SessionSpec::new(&path, 64, 64);
    let a = engine.create_session(&spec).unwrap();
    let b = engine.create_session(&spec).unwrap();

    let ma = engine.table().with_session(a, |s| Ok(Arc::clone(s.model()))).unwrap();
    let mb = engine.table().with_session(b, |s| Ok(Arc::clone(s.model()))).unwrap();
    assert!(Arc::ptr_eq(&ma, &mb));
    drop((ma, mb));
    assert_eq!(engine.table().loaded_models(), 1);

    engine.release_session(a).unwrap();
    assert_eq!(engine.table().loaded_models(), 1);
    engine.release_session(b).unwrap();
    assert_eq!(engine.table().loaded_models(), 0);
}

#[test]
fn sessions_on_different_models_coexist() {
    let (_dir_a, path_a) = tiny_path();
    let (_dir_b, path_b) = tiny_path();
    let engine = NativeEngine::default();
    let a = engine.create_session(&SessionSpec::new(&path_a, 64, 64)).unwrap();
    let b = engine.create_session(&SessionSpec::new(&path_b, 64, 64)).unwrap();
    assert_eq!(engine.table().loaded_models(), 2);
    assert_eq!(engine.generate_completion(a, "Hello", &greedy()).unwrap(), " world!");
    assert_eq!(engine.generate_completion(b, "Hello", &greedy()).unwrap(), " world!");
}

#[test]
fn sessions_are_independent() {
    let (_dir, path) = tiny_path();
    let engine = NativeEngine::default();
    let spec = SessionSpec::new(&path, 64, 64);
    let a = engine.create_session(&spec).unwrap();
    let b = engine.create_session(&spec).unwrap();
    engine.generate_completion(a, "Hello", &greedy()).unwrap();
    assert_eq!(engine.used_cells(a).unwrap(), 4);
    assert_eq!(engine.used_cells(b).unwrap(), 0);
    assert_eq!(engine.count_tokens(b, "Hello").unwrap(), 2);
}

// ===========================================================================
// Concurrency
// ===========================================================================

#[test]
fn calls_on_one_handle_are_serialized() {
    let (_dir, path) = tiny_path();
    let engine = Arc::new(NativeEngine::default());
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.generate_completion(h, "Hello", &greedy()))
        })
        .collect();
    for w in workers {
        assert_eq!(w.join().unwrap().unwrap(), " world!");
    }
    // One fresh call (4 cells) and three continuing calls (3 cells each).
    assert_eq!(engine.used_cells(h).unwrap(), 4 + 3 * 3);
}

#[test]
fn calls_on_different_handles_run_in_parallel() {
    let (_dir, path) = tiny_path();
    let engine = Arc::new(NativeEngine::default());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            engine
                .create_session(&SessionSpec::new(&path, 128, 128))
                .unwrap()
        })
        .collect();

    let workers: Vec<_> = handles
        .iter()
        .map(|&h| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.generate_chat(h, &[ChatMessage::user("Hello")], &SamplingConfig::default())
            })
        })
        .collect();
    for w in workers {
        assert_eq!(w.join().unwrap().unwrap(), "Hi there!");
    }
    assert_eq!(engine.table().len(), 4);
    assert_eq!(engine.table().loaded_models(), 1);
}

#[test]
fn release_waits_for_in_flight_calls() {
    let (_dir, path) = tiny_path();
    let engine = Arc::new(NativeEngine::default());
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();

    let worker = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.generate_completion(h, "la", &greedy()))
    };
    let releaser = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.release_session(h))
    };

    let generated = worker.join().unwrap();
    releaser.join().unwrap().unwrap();
    // Either the call finished before release, or it saw a dead handle.
    match generated {
        Ok(text) => assert_eq!(text, " la".repeat(32)),
        Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidHandle),
    }
    assert!(!engine.table().contains(h));
}

// ===========================================================================
// Telemetry
// ===========================================================================

#[test]
fn telemetry_reports_successful_calls_only() {
    let (_dir, path) = tiny_path();
    let log = LogTelemetry::new();
    let engine = NativeEngine::new(EngineConfig::default().with_telemetry(log.clone()));
    let h = engine
        .create_session(&SessionSpec::new(&path, 512, 512))
        .unwrap();

    engine.generate_completion(h, "Hello", &greedy()).unwrap();
    let m = log.last_metrics().unwrap();
    assert_eq!(m.kind, CallKind::Completion);
    assert_eq!(m.prompt_tokens, 2);
    assert_eq!(m.generated_tokens, 2);

    engine.generate_completion(h, "zzz", &greedy()).unwrap_err();
    assert_eq!(log.completed_calls(), 1);
}
