//! Integration tests for the Jaeger source against a local HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use usage_lens_net::jaeger::JaegerSource;
use usage_lens_net::protocol::trace_count;
use usage_lens_net::traits::{TimeWindow, TraceQuery, TraceSource, TransportConfig};
use usage_lens_net::{FetchError, IngestError, ParseError};
use usage_lens_runtime::mock_runtime::MockRuntime;

const TWO_TRACES: &str = r#"{"data":[{"traces":[
    {"spans":[{"tags":[{"key":"http.header.x-user-email","value":"alice@example.com"}],"duration":1000}]},
    {"spans":[{"tags":[{"key":"http.header.x-user-email","value":"bob@example.com"}],"duration":2000}]}
]}]}"#;

/// Serves one scripted `(status, body)` per connection, repeating the last
/// one, and records each request line.
struct ScriptedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            let mut index = 0;
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let request_line = head.lines().next().unwrap_or_default().to_string();
                seen.lock().unwrap().push(request_line);

                let (status, body) = responses[index.min(responses.len() - 1)];
                index += 1;
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn source(server: &ScriptedServer) -> JaegerSource<MockRuntime> {
    JaegerSource::with_runtime(
        &server.base_url,
        TransportConfig {
            timeout: Duration::from_secs(5),
            ..TransportConfig::default()
        },
        MockRuntime::new(),
    )
    .unwrap()
}

fn query() -> TraceQuery {
    TraceQuery::new("agentgateway", "24h", 1000).unwrap()
}

#[tokio::test]
async fn fetches_and_decodes_traces() {
    let server = ScriptedServer::start(vec![(200, TWO_TRACES)]).await;
    let source = source(&server);

    let batches = source.fetch(&query()).await.unwrap();
    assert_eq!(trace_count(&batches), 2);
    assert_eq!(
        batches[0].traces[1].spans[0].tag("http.header.x-user-email"),
        Some("bob@example.com")
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /api/traces?"));
    assert!(requests[0].contains("service=agentgateway"));
    assert!(requests[0].contains("lookback=24h"));
    assert!(requests[0].contains("limit=1000"));
    assert!(source.runtime().sleeps().is_empty());
}

#[tokio::test]
async fn window_replaces_lookback_on_the_wire() {
    let server = ScriptedServer::start(vec![(200, r#"{"data":[]}"#)]).await;
    let source = source(&server);

    let q = query().with_window(TimeWindow::new(1_000, 2_000));
    assert!(source.fetch(&q).await.unwrap().is_empty());

    let request = &server.requests()[0];
    assert!(request.contains("start=1000"));
    assert!(request.contains("end=2000"));
    assert!(!request.contains("lookback="));
}

#[tokio::test]
async fn retries_retryable_status_then_succeeds() {
    let server = ScriptedServer::start(vec![(503, "unavailable"), (502, "bad"), (200, TWO_TRACES)]).await;
    let source = source(&server);

    let batches = source.fetch(&query()).await.unwrap();
    assert_eq!(trace_count(&batches), 2);
    assert_eq!(server.requests().len(), 3);
    assert_eq!(
        source.runtime().sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let server = ScriptedServer::start(vec![(504, "timeout")]).await;
    let source = source(&server);

    let err = source.fetch(&query()).await.unwrap_err();
    match err {
        IngestError::Fetch(FetchError::Status {
            status, attempts, ..
        }) => {
            assert_eq!(status, 504);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.requests().len(), 3);
    assert_eq!(source.runtime().sleeps().len(), 2);
}

#[tokio::test]
async fn non_retryable_status_fails_immediately() {
    let server = ScriptedServer::start(vec![(500, "internal")]).await;
    let source = source(&server);

    let err = source.fetch(&query()).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Fetch(FetchError::Status { status: 500, attempts: 1, .. })
    ));
    assert_eq!(server.requests().len(), 1);
    assert!(source.runtime().sleeps().is_empty());
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let server = ScriptedServer::start(vec![(200, r#"{"data":"nope"}"#)]).await;
    let source = source(&server);

    let err = source.fetch(&query()).await.unwrap_err();
    assert!(matches!(err, IngestError::Parse(ParseError::Malformed(_))));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port with nothing listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let source = JaegerSource::with_runtime(
        format!("http://{addr}"),
        TransportConfig::default(),
        MockRuntime::new(),
    )
    .unwrap();

    let err = source.fetch(&query()).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Fetch(FetchError::Transport { attempts: 3, .. })
    ));
    assert_eq!(source.runtime().sleeps().len(), 2);
}
