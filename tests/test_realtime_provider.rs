//! Integration tests for the realtime provider against an in-process mock
//! of the AppSync realtime endpoint: handshake shape, data delivery, and
//! multiplexing several subscriptions over one socket.

mod common;

use appsync_realtime::{
    AuthMode, ConnectionOptions, ConnectionState, RealtimeProvider, RealtimeTimeouts,
    SubscribeOptions,
};
use common::{init_logging, MockBehavior, MockServer};
use serde_json::json;
use std::time::Duration;

const QUERY: &str = "subscription S { onCreateTodo { id name } }";
const WAIT: Duration = Duration::from_secs(5);

fn test_provider() -> RealtimeProvider {
    RealtimeProvider::builder()
        .timeouts(RealtimeTimeouts::fast())
        .connection_options(
            ConnectionOptions::default()
                .with_max_handshake_attempts(2)
                .with_handshake_retry_base_ms(50)
                .with_reconnect_delay_ms(100)
                .with_reconnect_max_delay_ms(500),
        )
        .build()
}

fn options_for(server: &MockServer) -> SubscribeOptions {
    SubscribeOptions::new(server.endpoint(), QUERY)
        .with_auth_mode(AuthMode::ApiKey)
        .with_api_key("FAKE")
}

#[tokio::test]
async fn test_happy_path_delivers_data() {
    init_logging();
    let server = MockServer::start(MockBehavior::default()).await;
    let provider = test_provider();
    let mut subscription = provider.subscribe(options_for(&server));

    let (event, id) = tokio::join!(subscription.next(), async {
        let starts = server.wait_for_frames("start", 1, WAIT).await;
        let id = starts[0]["id"].as_str().unwrap().to_string();
        server.send_data(
            &id,
            json!({ "data": { "onCreateTodo": { "id": "1", "name": "x" } } }),
        );
        id
    });

    let payload = event.unwrap().unwrap();
    assert_eq!(payload["data"]["onCreateTodo"]["name"], "x");
    assert_eq!(provider.connection_state(), ConnectionState::Connected);

    // Ids are UUID-shaped.
    assert_eq!(id.len(), 36);
    assert_eq!(id.matches('-').count(), 4);
    assert_eq!(subscription.id(), Some(id.as_str()));

    // Handshake URL: custom domain gets /realtime plus the encoded header
    // and the fixed empty-object payload.
    let paths = server.handshake_paths();
    assert!(paths[0].starts_with("/graphql/realtime?header="), "{}", paths[0]);
    assert!(paths[0].ends_with("&payload=e30="), "{}", paths[0]);

    // The handshake begins with connection_init.
    assert_eq!(server.frames("connection_init").len(), 1);

    // Start frame shape: serialized operation plus authorization headers.
    let start = &server.frames("start")[0];
    let data: serde_json::Value =
        serde_json::from_str(start["payload"]["data"].as_str().unwrap()).unwrap();
    assert_eq!(data["query"], QUERY);
    assert_eq!(data["variables"], json!({}));
    let authorization = &start["payload"]["extensions"]["authorization"];
    assert_eq!(authorization["x-api-key"], "FAKE");
    assert!(authorization["host"].as_str().unwrap().starts_with("127.0.0.1"));
    assert!(authorization["x-amz-date"].as_str().unwrap().ends_with('Z'));
    assert!(authorization["x-amz-user-agent"]
        .as_str()
        .unwrap()
        .starts_with("aws-appsync-realtime-client/rust"));

    subscription.close().await.unwrap();
    provider.close().await;
}

#[tokio::test]
async fn test_two_subscriptions_share_one_socket() {
    init_logging();
    let server = MockServer::start(MockBehavior::default()).await;
    let provider = test_provider();

    let mut sub_a = provider.subscribe(options_for(&server));
    let mut sub_b = provider.subscribe(options_for(&server));

    let (event_a, id_a) = tokio::join!(sub_a.next(), async {
        let starts = server.wait_for_frames("start", 1, WAIT).await;
        let id = starts[0]["id"].as_str().unwrap().to_string();
        server.send_data(&id, json!({ "data": { "stream": "a" } }));
        id
    });
    assert_eq!(event_a.unwrap().unwrap()["data"]["stream"], "a");

    let (event_b, id_b) = tokio::join!(sub_b.next(), async {
        let starts = server.wait_for_frames("start", 2, WAIT).await;
        let id = starts[1]["id"].as_str().unwrap().to_string();
        server.send_data(&id, json!({ "data": { "stream": "b" } }));
        id
    });
    assert_eq!(event_b.unwrap().unwrap()["data"]["stream"], "b");

    // Independent ids, one socket.
    assert_ne!(id_a, id_b);
    assert_eq!(server.total_connections(), 1);

    // Frames for A are never delivered to B and vice versa.
    server.send_data(&id_a, json!({ "data": { "stream": "a2" } }));
    assert_eq!(sub_a.next().await.unwrap().unwrap()["data"]["stream"], "a2");

    // Closing A stops only A; B keeps receiving.
    sub_a.close().await.unwrap();
    let stops = server.wait_for_frames("stop", 1, WAIT).await;
    assert_eq!(stops[0]["id"].as_str().unwrap(), id_a);

    server.send_data(&id_b, json!({ "data": { "stream": "b2" } }));
    assert_eq!(sub_b.next().await.unwrap().unwrap()["data"]["stream"], "b2");

    // After the last teardown the idle socket closes shortly after.
    sub_b.close().await.unwrap();
    server.wait_for_no_open_connections(Duration::from_secs(2)).await;
    assert_eq!(provider.connection_state(), ConnectionState::Disconnected);

    provider.close().await;
}

#[tokio::test]
async fn test_data_for_unknown_id_is_dropped() {
    init_logging();
    let server = MockServer::start(MockBehavior::default()).await;
    let provider = test_provider();
    let mut subscription = provider.subscribe(options_for(&server));

    let (event, _id) = tokio::join!(subscription.next(), async {
        let starts = server.wait_for_frames("start", 1, WAIT).await;
        let id = starts[0]["id"].as_str().unwrap().to_string();
        // A frame for a session this provider never started...
        server.send_data("unknown-id", json!({ "data": { "stream": "ghost" } }));
        // ...followed by one for the real subscription.
        server.send_data(&id, json!({ "data": { "stream": "real" } }));
        id
    });

    assert_eq!(event.unwrap().unwrap()["data"]["stream"], "real");

    subscription.close().await.unwrap();
    provider.close().await;
}
