//! Behaviour every conversation store backend must share.

use convoai::store::{ConversationStore, Role, StoreError, MAX_CONTENT_SIZE};

fn ok<T>(result: Result<T, StoreError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("store operation failed: {err}"),
    }
}

pub async fn recent_returns_newest_in_chronological_order(store: &dyn ConversationStore) {
    let roles = [Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User];
    for (i, role) in roles.into_iter().enumerate() {
        ok(store.append("alice", role, &format!("m{i}"), None).await);
    }

    let recent = ok(store.recent("alice", 3).await);
    let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["m2", "m3", "m4"]);
    assert_eq!(recent[0].role, Role::User);
    assert_eq!(recent[1].role, Role::Assistant);
    assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    assert_eq!(ok(store.recent("alice", 50).await).len(), 5);
    assert!(ok(store.recent("alice", 0).await).is_empty());
}

pub async fn unknown_user_has_empty_history(store: &dyn ConversationStore) {
    assert!(ok(store.recent("nobody", 10).await).is_empty());
    let stats = ok(store.stats("nobody").await);
    assert_eq!(stats.total_messages, 0);
    assert!(stats.first_message_at.is_none());
    assert!(!stats.has_history);
}

pub async fn histories_are_isolated_per_user(store: &dyn ConversationStore) {
    ok(store.append("alice", Role::User, "from alice", None).await);
    ok(store.append("bob", Role::User, "from bob", None).await);

    let alice = ok(store.recent("alice", 10).await);
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].text, "from alice");
    assert_eq!(alice[0].user_id, "alice");
}

pub async fn session_id_is_preserved(store: &dyn ConversationStore) {
    ok(store.append("alice", Role::User, "hi", Some("s-1")).await);
    ok(store.append("alice", Role::Assistant, "hello", None).await);
    let recent = ok(store.recent("alice", 2).await);
    assert_eq!(recent[0].session_id.as_deref(), Some("s-1"));
    assert_eq!(recent[1].session_id, None);
}

pub async fn stats_count_messages(store: &dyn ConversationStore) {
    let first = ok(store.append("alice", Role::User, "one", None).await);
    ok(store.append("alice", Role::Assistant, "two", None).await);

    let stats = ok(store.stats("alice").await);
    assert_eq!(stats.total_messages, 2);
    assert_eq!(stats.first_message_at, Some(first.timestamp));
    assert!(stats.has_history);
}

pub async fn oversized_content_is_rejected(store: &dyn ConversationStore) {
    let huge = "x".repeat(MAX_CONTENT_SIZE.saturating_add(1));
    assert!(matches!(
        store.append("alice", Role::User, &huge, None).await,
        Err(StoreError::ContentTooLarge { .. })
    ));
    assert!(ok(store.recent("alice", 10).await).is_empty());
}

pub async fn profile_is_created_lazily_once(store: &dyn ConversationStore) {
    let first = ok(store.get_profile("carol").await);
    assert_eq!(first.user_id, "carol");
    assert!(first.display_name.is_none());
    assert!(first.interests.is_empty());

    let second = ok(store.get_profile("carol").await);
    assert_eq!(second.first_seen, first.first_seen);
}

pub async fn append_touches_profile(store: &dyn ConversationStore) {
    let message = ok(store.append("dave", Role::User, "hi", None).await);
    let profile = ok(store.get_profile("dave").await);
    assert_eq!(profile.last_seen, message.timestamp);
    assert!(profile.first_seen <= profile.last_seen);
}

pub async fn name_is_overwritten(store: &dyn ConversationStore) {
    ok(store.set_name("erin", "Erin").await);
    ok(store.set_name("erin", "Eri").await);
    assert_eq!(ok(store.get_profile("erin").await).display_name.as_deref(), Some("Eri"));
}

pub async fn interests_are_a_set(store: &dyn ConversationStore) {
    assert!(ok(store.add_interest("frank", "music").await));
    assert!(ok(store.add_interest("frank", "reading").await));
    assert!(!ok(store.add_interest("frank", "music").await));

    let interests: Vec<String> = ok(store.get_profile("frank").await)
        .interests
        .into_iter()
        .collect();
    assert_eq!(interests, vec!["music".to_owned(), "reading".to_owned()]);
}

pub async fn clear_user_forgets_everything(store: &dyn ConversationStore) {
    ok(store.append("gina", Role::User, "hello", None).await);
    ok(store.set_name("gina", "Gina").await);
    ok(store.add_interest("gina", "travel").await);
    ok(store.append("hank", Role::User, "still here", None).await);

    ok(store.clear_user("gina").await);

    assert!(ok(store.recent("gina", 10).await).is_empty());
    let profile = ok(store.get_profile("gina").await);
    assert!(profile.display_name.is_none());
    assert!(profile.interests.is_empty());
    assert_eq!(ok(store.recent("hank", 10).await).len(), 1);
}

pub async fn clear_messages_keeps_profile(store: &dyn ConversationStore) {
    ok(store.append("ivy", Role::User, "hello", None).await);
    ok(store.set_name("ivy", "Ivy").await);

    ok(store.clear_messages("ivy").await);

    assert!(ok(store.recent("ivy", 10).await).is_empty());
    assert_eq!(ok(store.get_profile("ivy").await).display_name.as_deref(), Some("Ivy"));

    ok(store.clear_profile("ivy").await);
    assert!(ok(store.get_profile("ivy").await).display_name.is_none());
}
