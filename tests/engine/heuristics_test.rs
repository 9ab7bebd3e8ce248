//! Name and interest extraction.

use convoai::engine::heuristics::{extract_interests, extract_name};

#[test]
fn name_after_trigger_is_title_cased() {
    assert_eq!(extract_name("Hi, my name is Alice").as_deref(), Some("Alice"));
    assert_eq!(extract_name("I'm bob!").as_deref(), Some("Bob"));
    assert_eq!(extract_name("you can call me MAYBE").as_deref(), Some("Maybe"));
}

#[test]
fn single_letter_or_non_alphabetic_names_are_rejected() {
    assert_eq!(extract_name("my name is a"), None);
    assert_eq!(extract_name("I am 25"), None);
    assert_eq!(extract_name("my name is"), None);
}

#[test]
fn triggers_are_tried_in_priority_order() {
    assert_eq!(
        extract_name("I'm happy, my name is Carol").as_deref(),
        Some("Carol")
    );
    assert_eq!(
        extract_name("my name is 42 but call me Dee").as_deref(),
        Some("Dee")
    );
}

#[test]
fn last_occurrence_of_a_trigger_wins() {
    assert_eq!(
        extract_name("my name is Ann. Actually my name is Beth").as_deref(),
        Some("Beth")
    );
}

#[test]
fn no_trigger_no_name() {
    assert_eq!(extract_name("hello there"), None);
    assert_eq!(extract_name("him and her"), None);
}

#[test]
fn interests_follow_a_trigger() {
    assert_eq!(
        extract_interests("I love playing guitar and reading books"),
        vec!["music", "reading"]
    );
    assert_eq!(extract_interests("My hobby is baking"), vec!["cooking"]);
}

#[test]
fn interests_need_a_trigger() {
    assert!(extract_interests("guitar and books are on the table").is_empty());
}

#[test]
fn short_keywords_match_whole_words() {
    assert!(extract_interests("I like painting").is_empty());
    assert_eq!(extract_interests("I love air travel"), vec!["travel"]);
    assert_eq!(extract_interests("I enjoy AI research"), vec!["technology"]);
    assert_eq!(
        extract_interests("I'm interested in machine learning"),
        vec!["technology"]
    );
}

#[test]
fn inflected_keywords_count() {
    assert_eq!(
        extract_interests("I love my guitars and playing video game tournaments"),
        vec!["music"]
    );
    assert_eq!(
        extract_interests("I like gymnastics and old novels"),
        vec!["sports", "reading"]
    );
}
