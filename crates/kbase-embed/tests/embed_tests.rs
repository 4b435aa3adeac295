use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use kbase_core::config::{EmbeddingProviderKind, EmbeddingSettings};
use kbase_core::traits::Embedder;
use kbase_core::Error;
use kbase_embed::{build_embedder, fake_requested, FakeEmbedder, HttpEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[tokio::test]
async fn fake_embedder_is_deterministic_and_normalized() {
    let embedder = FakeEmbedder::new(64);
    let texts = vec!["SQL joins, explained.".to_string(), "sql JOINS explained".to_string()];
    let vectors = embedder.embed_batch(&texts).await.unwrap();

    assert_eq!(vectors.len(), 2);
    assert!(vectors.iter().all(|v| v.len() == 64));
    assert_eq!(vectors[0], vectors[1], "case and punctuation are ignored");
    let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
    assert_eq!(embedder.embed("sql joins explained").await.unwrap(), vectors[0]);
}

#[tokio::test]
async fn shared_words_score_higher() {
    let embedder = FakeEmbedder::new(256);
    let query = embedder.embed_text("database joins");
    let near = embedder.embed_text("how database joins work");
    let far = embedder.embed_text("garden tomato watering");
    assert!(cosine(&query, &near) > cosine(&query, &far));
}

#[test]
fn fake_switch_values() {
    assert!(fake_requested(Some("1")));
    assert!(fake_requested(Some("TRUE")));
    assert!(!fake_requested(Some("0")));
    assert!(!fake_requested(None));
}

#[test]
fn fake_provider_needs_no_credentials() {
    let settings = EmbeddingSettings {
        provider: EmbeddingProviderKind::Fake,
        dimension: 32,
        ..EmbeddingSettings::default()
    };
    let embedder = build_embedder(&settings, false).unwrap();
    assert_eq!(embedder.dimension(), 32);
}

#[test]
fn missing_api_key_is_a_configuration_error() {
    let settings = EmbeddingSettings {
        api_key_env: "KBASE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        ..EmbeddingSettings::default()
    };
    assert!(matches!(build_embedder(&settings, false), Err(Error::Configuration(_))));
    assert!(build_embedder(&settings, true).is_ok(), "fake override skips credentials");
}

#[test]
fn empty_api_key_is_rejected() {
    let result = HttpEmbedder::new("http://localhost:1/v1/embeddings", "m", 3, Some(String::new()));
    assert!(matches!(result, Err(Error::Configuration(_))));
}

/// Serves exactly one HTTP response with the given status and JSON body.
async fn serve_once(status: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });
    format!("http://{addr}/v1/embeddings")
}

#[tokio::test]
async fn http_embedder_orders_by_index() {
    let endpoint = serve_once(
        "200 OK",
        r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
    )
    .await;
    let embedder = HttpEmbedder::new(endpoint, "test-model", 2, Some("sk-test".into())).unwrap();
    let vectors = embedder
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn http_embedder_surfaces_api_errors() {
    let endpoint = serve_once(
        "429 Too Many Requests",
        r#"{"error":{"message":"rate limited"}}"#,
    )
    .await;
    let embedder = HttpEmbedder::new(endpoint, "test-model", 2, None).unwrap();
    let err = embedder.embed_batch(&["x".to_string()]).await.unwrap_err();
    match err {
        Error::Provider(message) => assert!(message.contains("rate limited"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn http_embedder_rejects_short_responses() {
    let endpoint = serve_once("200 OK", r#"{"data":[{"index":0,"embedding":[1.0,0.0]}]}"#).await;
    let embedder = HttpEmbedder::new(endpoint, "test-model", 2, None).unwrap();
    let err = embedder
        .embed_batch(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
}
