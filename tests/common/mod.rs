#![allow(dead_code, reason = "each integration test uses a different subset")]

use ragchat::config::Config;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const DIMENSION: usize = 64;
pub const MODEL: &str = "all-minilm";

pub const CORPUS: &str = "\
## Sales
### Pipeline
Leads are qualified weekly by the sales team.
Every lead gets an owner within one day.
Q. Why do sales fail?
Because follow-up is slow.
### Pricing
Discounts above ten percent require approval.
## Support
### Tickets
Q. What is the response target?
Four hours during business days.
";

/// Bag-of-words vector: each lowercase word lands in a hashed bucket
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(17_usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
            % DIMENSION;
        vector[bucket] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}

/// Answers `/api/embed` with keyword vectors for every input
struct KeywordEmbedResponder;

impl Respond for KeywordEmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .map(|input| keyword_vector(input.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

/// Fake Ollama server with the version, tags and embed endpoints
pub async fn start_ollama() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "0.6.0" })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": format!("{MODEL}:latest"), "size": 45_000_000 }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(KeywordEmbedResponder)
        .mount(&server)
        .await;

    server
}

/// SSE body in the chat completions streaming format
pub fn completion_stream(tokens: &[&str]) -> String {
    let mut body: String = tokens
        .iter()
        .map(|token| {
            let chunk = json!({ "choices": [{ "delta": { "content": token } }] });
            format!("data: {chunk}\n\n")
        })
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

/// Fake chat completions API: streaming requests get `tokens`, plain
/// requests (summaries) get `summary`
pub async fn start_llm(tokens: &[&str], summary: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(completion_stream(tokens)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": summary } }]
        })))
        .mount(&server)
        .await;

    server
}

/// Config in a fresh directory pointing at the fake services, with the
/// knowledge base already written
pub fn test_config(ollama: &MockServer, llm: Option<&MockServer>) -> (TempDir, Config) {
    let dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(dir.path()).expect("default config should load");

    config.embedding.host = ollama.address().ip().to_string();
    config.embedding.port = ollama.address().port();
    config.embedding.model = MODEL.to_string();
    config.embedding.dimension = DIMENSION;
    config.embedding.batch_size = 4;

    if let Some(llm) = llm {
        config.llm.base_url = format!("{}/v1", llm.uri());
        config.llm.timeout_secs = 5;
    }

    std::fs::write(config.corpus_source_path(), CORPUS).expect("should write corpus");
    (dir, config)
}
