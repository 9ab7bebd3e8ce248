//! OpenAI-compatible completions provider tests.

use convoai::providers::openai::{build_request, parse_response, OpenAiCompatibleProvider};
use convoai::providers::{CompletionProvider, GenerationOptions, ProviderError};

use crate::fake_server::serve_once;

#[test]
fn build_request_caps_stop_sequences() {
    let options = GenerationOptions::default().with_stop(
        ["a", "b", "c", "d", "e"].iter().map(|s| (*s).to_owned()),
    );
    let req = build_request("gpt-3.5-turbo-instruct", "prompt", &options);
    assert_eq!(req.max_tokens, 50);
    assert_eq!(req.stop.len(), 4);
}

#[test]
fn parse_response_takes_first_choice() {
    let body = r#"{"model":"m","choices":[{"text":" Sure.","finish_reason":"stop"},{"text":"no"}]}"#;
    assert_eq!(parse_response(body).ok().as_deref(), Some(" Sure."));
}

#[test]
fn parse_response_without_choices_is_parse_error() {
    assert!(matches!(
        parse_response(r#"{"model":"m","choices":[]}"#),
        Err(ProviderError::Parse(_))
    ));
}

#[tokio::test]
async fn complete_sends_bearer_token() {
    let (url, captured) = serve_once("200 OK", r#"{"choices":[{"text":"Hello"}]}"#).await;
    let provider = OpenAiCompatibleProvider::with_client(
        reqwest::Client::new(),
        url,
        "m".to_owned(),
        Some("sk-test-key".to_owned()),
    );

    let text = provider.complete("Human: hi\nAI:", &GenerationOptions::default()).await;
    assert_eq!(text.ok().as_deref(), Some("Hello"));

    let request = match captured.await {
        Ok(request) => request,
        Err(err) => panic!("server should capture the request: {err}"),
    };
    assert!(request.head.starts_with("POST /v1/completions "));
    assert!(request
        .head
        .to_ascii_lowercase()
        .contains("authorization: bearer sk-test-key"));
}

#[tokio::test]
async fn error_status_surfaces_as_http_status() {
    let (url, _captured) = serve_once("503 Service Unavailable", "overloaded").await;
    let provider =
        OpenAiCompatibleProvider::with_client(reqwest::Client::new(), url, "m".to_owned(), None);

    match provider.complete("x", &GenerationOptions::default()).await {
        Err(ProviderError::HttpStatus { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected http status error, got: {other:?}"),
    }
}

#[test]
fn debug_output_hides_api_key() {
    let provider = OpenAiCompatibleProvider::with_client(
        reqwest::Client::new(),
        "http://localhost:8000".to_owned(),
        "m".to_owned(),
        Some("sk-very-secret".to_owned()),
    );
    let rendered = format!("{provider:?}");
    assert!(!rendered.contains("sk-very-secret"));
}
