//! End-to-end turns through the synthesis engine.

use std::sync::Arc;
use std::time::Duration;

use convoai::engine::{
    EngineError, EngineSettings, ProviderState, SynthesisEngine, APOLOGY_MESSAGE, LOADING_MESSAGE,
};
use convoai::personality::PersonalityCatalog;
use convoai::providers::ProviderError;
use convoai::store::memory::InMemoryStore;
use convoai::store::{MessageStore, ProfileStore, Role, StoreError, MAX_CONTENT_SIZE};

use crate::fake_provider::{engine_with, engine_with_settings, ScriptedProvider};

async fn turn(engine: &SynthesisEngine, user: &str, text: &str) -> String {
    match engine.submit(user, text, None).await {
        Ok(reply) => reply,
        Err(err) => panic!("turn should succeed: {err}"),
    }
}

async fn history(store: &InMemoryStore, user: &str) -> Vec<(Role, String)> {
    match store.recent(user, 100).await {
        Ok(log) => log.into_iter().map(|m| (m.role, m.text)).collect(),
        Err(err) => panic!("history should load: {err}"),
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_reply_is_returned_and_recorded() {
    let provider = Arc::new(ScriptedProvider::always(" Nice to meet you!\nHuman: and then"));
    let (engine, store) = engine_with(&provider, ProviderState::Ready);

    let reply = turn(&engine, "alice", "Hello there").await;
    assert_eq!(reply, "Nice to meet you");
    assert_eq!(provider.call_count(), 1);
    assert_eq!(
        history(&store, "alice").await,
        vec![
            (Role::User, "Hello there".to_owned()),
            (Role::Assistant, "Nice to meet you".to_owned()),
        ]
    );
}

#[tokio::test]
async fn primary_call_uses_stop_sequences_and_full_prompt() {
    let provider = Arc::new(ScriptedProvider::always("Sure thing"));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    turn(&engine, "alice", "Hello").await;

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].prompt.starts_with("This is a conversation between a human and ConvoAI"));
    assert!(calls[0].prompt.ends_with("Human: Hello\nAI:"));
    assert_eq!(calls[0].options.max_new_tokens, 50);
    assert!(calls[0].options.stop.contains(&"\nHuman:".to_owned()));
    assert!(calls[0].options.stop.contains(&"\nAI:".to_owned()));
}

#[tokio::test]
async fn prompt_carries_history_without_duplicating_the_new_message() {
    let provider = Arc::new(ScriptedProvider::script([
        Ok("Nice to meet you Alice".to_owned()),
        Ok("Of course I remember".to_owned()),
    ]));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    turn(&engine, "alice", "my name is Alice").await;
    turn(&engine, "alice", "Do you remember me?").await;

    let calls = provider.calls();
    let second = &calls[1].prompt;
    assert!(second.starts_with("This is a conversation between Alice and ConvoAI"));
    assert!(second.ends_with(
        "Human: my name is Alice\nAI: Nice to meet you Alice\nHuman: Do you remember me?\nAI:"
    ));
    assert_eq!(second.matches("Do you remember me?").count(), 1);
}

#[tokio::test]
async fn personality_key_selects_the_framing() {
    let provider = Arc::new(ScriptedProvider::always("Patience is a virtue"));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    let reply = engine.submit("u", "Any advice?", Some("wise_mentor")).await;
    assert!(reply.is_ok());
    let unknown = engine.submit("u", "Hello", Some("no_such_key")).await;
    assert!(unknown.is_ok());

    let calls = provider.calls();
    assert!(calls[0].prompt.contains("thoughtful, gives advice, philosophical"));
    assert!(calls[1].prompt.contains("helpful, professional, and warm"));
}

#[tokio::test]
async fn session_personality_and_id_are_used() {
    let provider = Arc::new(ScriptedProvider::always("Let's explore that"));
    let (engine, store) = engine_with(&provider, ProviderState::Ready);

    let mut session = engine.new_session();
    assert!(engine.switch_personality(&mut session, "curious_explorer").ok);
    let reply = engine.submit_in(&session, "u", "Tell me about stars").await;
    assert!(reply.is_ok());

    assert!(provider.calls()[0].prompt.contains("inquisitive, loves learning"));
    let log = match store.recent("u", 10).await {
        Ok(log) => log,
        Err(err) => panic!("history should load: {err}"),
    };
    assert!(log.iter().all(|m| m.session_id.as_deref() == Some(session.id.as_str())));
}

// ---------------------------------------------------------------------------
// Degenerate output and retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn echo_is_never_returned_verbatim() {
    let provider = Arc::new(ScriptedProvider::always("hello"));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    let reply = turn(&engine, "u", "hello").await;
    assert_ne!(reply.to_lowercase(), "hello");
    assert!(reply.contains("'hello'"));
}

#[tokio::test]
async fn empty_or_dot_output_yields_engaging_reply() {
    for raw in ["", "."] {
        let provider = Arc::new(ScriptedProvider::always(raw));
        let (engine, _store) = engine_with(&provider, ProviderState::Ready);

        let reply = turn(&engine, "u", "Tell me a story").await;
        assert!(reply.chars().count() >= 3, "raw {raw:?}");
        assert!(reply.contains("Tell me a story"), "raw {raw:?}");
    }
}

#[tokio::test]
async fn degenerate_provider_is_called_at_most_twice() {
    let provider = Arc::new(ScriptedProvider::always("."));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    turn(&engine, "u", "What is love?").await;
    assert_eq!(provider.call_count(), 2);

    turn(&engine, "u", "Again?").await;
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn retry_uses_simplified_prompt_and_hotter_options() {
    let provider = Arc::new(ScriptedProvider::script([
        Ok(".".to_owned()),
        Ok(" a great question!".to_owned()),
    ]));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    let reply = turn(&engine, "u", "Why is the sky blue?").await;
    assert_eq!(reply, "That's a great question");

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].prompt, "Human: Why is the sky blue?\nAI: That's");
    assert_eq!(calls[1].options.max_new_tokens, 20);
    assert!(calls[1].options.temperature > calls[0].options.temperature);
    assert!(calls[1].options.stop.contains(&"\nHuman:".to_owned()));
}

#[tokio::test]
async fn failed_retry_keeps_first_placeholder() {
    let provider = Arc::new(ScriptedProvider::script([
        Ok(String::new()),
        Err(ProviderError::Parse("garbled".to_owned())),
    ]));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    let reply = turn(&engine, "u", "Tell me a joke").await;
    assert_eq!(
        reply,
        "I find 'Tell me a joke' intriguing. What are your thoughts on it?"
    );
    assert_eq!(engine.provider_state(), ProviderState::Ready);
}

// ---------------------------------------------------------------------------
// Provider failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unavailable_provider_gets_loading_reply_and_both_messages() {
    let provider = Arc::new(ScriptedProvider::always("never used"));
    let (engine, store) = engine_with(&provider, ProviderState::Unavailable);

    let reply = turn(&engine, "u", "Hi, my name is Alice").await;
    assert_eq!(reply, LOADING_MESSAGE);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(
        history(&store, "u").await,
        vec![
            (Role::User, "Hi, my name is Alice".to_owned()),
            (Role::Assistant, LOADING_MESSAGE.to_owned()),
        ]
    );

    let profile = match store.get_profile("u").await {
        Ok(profile) => profile,
        Err(err) => panic!("profile should load: {err}"),
    };
    assert_eq!(profile.display_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn unreachable_error_demotes_to_unavailable() {
    let provider = Arc::new(ScriptedProvider::script([Err(ProviderError::Unavailable(
        "connection refused".to_owned(),
    ))]));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    assert_eq!(turn(&engine, "u", "Hello").await, APOLOGY_MESSAGE);
    assert_eq!(engine.provider_state(), ProviderState::Unavailable);

    assert_eq!(turn(&engine, "u", "Hello again").await, LOADING_MESSAGE);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn http_status_error_apologises_but_stays_ready() {
    let provider = Arc::new(ScriptedProvider::script([Err(ProviderError::HttpStatus {
        status: 500,
        body: "boom".to_owned(),
    })]));
    let (engine, store) = engine_with(&provider, ProviderState::Ready);

    assert_eq!(turn(&engine, "u", "Hello").await, APOLOGY_MESSAGE);
    assert_eq!(engine.provider_state(), ProviderState::Ready);
    assert_eq!(history(&store, "u").await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out_without_demotion() {
    let provider = Arc::new(ScriptedProvider::always("too late").slow(Duration::from_secs(120)));
    let settings = EngineSettings {
        call_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    };
    let (engine, _store) = engine_with_settings(&provider, ProviderState::Ready, settings);

    assert_eq!(turn(&engine, "u", "Hello").await, APOLOGY_MESSAGE);
    assert_eq!(engine.provider_state(), ProviderState::Ready);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn start_probes_provider_once() {
    let ready = Arc::new(ScriptedProvider::always("hi"));
    let engine = SynthesisEngine::start(
        Arc::new(InMemoryStore::new()),
        Arc::new(PersonalityCatalog::builtin()),
        ready,
        EngineSettings::default(),
    )
    .await;
    assert_eq!(engine.provider_state(), ProviderState::Ready);
    assert_eq!(engine.status_line(), "AI model 'scripted' ready");

    let down = Arc::new(ScriptedProvider::always("hi").failing_probe());
    let engine = SynthesisEngine::start(
        Arc::new(InMemoryStore::new()),
        Arc::new(PersonalityCatalog::builtin()),
        down,
        EngineSettings::default(),
    )
    .await;
    assert_eq!(engine.provider_state(), ProviderState::Unavailable);
    assert!(engine.status_line().contains("unavailable"));
}

// ---------------------------------------------------------------------------
// Profile heuristics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn name_and_interests_are_learned() {
    let provider = Arc::new(ScriptedProvider::always("That sounds lovely"));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    turn(&engine, "u", "Hi, my name is Alice").await;
    turn(&engine, "u", "I love playing guitar and reading books").await;

    let profile = match engine.profile_snapshot("u").await {
        Ok(profile) => profile,
        Err(err) => panic!("profile should load: {err}"),
    };
    assert_eq!(profile.display_name.as_deref(), Some("Alice"));
    let interests: Vec<&str> = profile.interests.iter().map(String::as_str).collect();
    assert_eq!(interests, vec!["music", "reading"]);
}

#[tokio::test]
async fn single_letter_name_is_ignored() {
    let provider = Arc::new(ScriptedProvider::always("Okay then"));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);

    turn(&engine, "u", "my name is a").await;
    let profile = match engine.profile_snapshot("u").await {
        Ok(profile) => profile,
        Err(err) => panic!("profile should load: {err}"),
    };
    assert!(profile.display_name.is_none());
}

// ---------------------------------------------------------------------------
// Store interaction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_failure_aborts_the_turn() {
    let provider = Arc::new(ScriptedProvider::always("unused"));
    let (engine, store) = engine_with(&provider, ProviderState::Ready);

    let huge = "x".repeat(MAX_CONTENT_SIZE.saturating_add(1));
    match engine.submit("u", &huge, None).await {
        Err(EngineError::Store(StoreError::ContentTooLarge { .. })) => {}
        other => panic!("expected store error, got: {other:?}"),
    }
    assert_eq!(provider.call_count(), 0);
    assert!(history(&store, "u").await.is_empty());
}

#[tokio::test]
async fn clear_forgets_user_and_stats_reset() {
    let provider = Arc::new(ScriptedProvider::always("Noted"));
    let (engine, store) = engine_with(&provider, ProviderState::Ready);

    turn(&engine, "u", "my name is Zed").await;
    let stats = match engine.stats("u").await {
        Ok(stats) => stats,
        Err(err) => panic!("stats should load: {err}"),
    };
    assert_eq!(stats.total_messages, 2);

    assert!(engine.clear("u").await.is_ok());
    assert!(history(&store, "u").await.is_empty());
    let profile = match store.get_profile("u").await {
        Ok(profile) => profile,
        Err(err) => panic!("profile should load: {err}"),
    };
    assert!(profile.display_name.is_none());
}

#[tokio::test]
async fn concurrent_turns_for_one_user_do_not_interleave() {
    let provider = Arc::new(ScriptedProvider::always("Got it"));
    let (engine, store) = engine_with(&provider, ProviderState::Ready);

    let (a, b, c) = tokio::join!(
        engine.submit("u", "first", None),
        engine.submit("u", "second", None),
        engine.submit("other", "elsewhere", None),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let roles: Vec<Role> = history(&store, "u").await.into_iter().map(|(r, _)| r).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(history(&store, "other").await.len(), 2);
}

// ---------------------------------------------------------------------------
// Personality switching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn switch_messages() {
    let provider = Arc::new(ScriptedProvider::always("hi"));
    let (engine, _store) = engine_with(&provider, ProviderState::Ready);
    let mut session = engine.new_session();

    let ok = engine.switch_personality(&mut session, "playful_companion");
    assert!(ok.ok);
    assert_eq!(
        ok.message,
        "🎭 Switched to Playful Companion personality! My replies will adapt to this new style."
    );

    let bad = engine.switch_personality(&mut session, "pirate");
    assert!(!bad.ok);
    assert_eq!(
        bad.message,
        "❌ Personality 'pirate' not found. Available: friendly_assistant, curious_explorer, wise_mentor, playful_companion"
    );
    assert_eq!(session.personality, "playful_companion");
    assert!(!engine.greeting(&session).is_empty());
}
