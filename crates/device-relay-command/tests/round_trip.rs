//! Dispatch → agent → correlate against the in-memory store.

use std::{sync::Arc, time::Duration};

use device_relay_command::{AwaitOutcome, CommandClient, Correlation, Correlator, Dispatcher};
use device_relay_core::{
    CommandEnvelope, CorrelationMode, MediatedStore, RelayConfig, StorePath, WaitMode,
};
use device_relay_store::MemoryStore;
use futures::StreamExt;
use serde_json::{Value, json};

/// How the simulated agent files its answers.
#[derive(Clone, Copy)]
enum Reply {
    /// Under the command's key.
    Keyed,
    /// Appended with a fresh key, echoing the action.
    Appended,
}

/// Answer every command for `user_id` after `delay` with `result` fields.
fn spawn_agent(
    store: Arc<MemoryStore>,
    user_id: &str,
    reply: Reply,
    delay: Duration,
    result: Value,
) -> tokio::task::JoinHandle<()> {
    let commands = StorePath::commands(user_id).unwrap();
    let responses = StorePath::responses(user_id).unwrap();
    tokio::spawn(async move {
        let mut events = store.subscribe(&commands).await.unwrap();
        while let Some(Ok(event)) = events.next().await {
            let Some(raw) = event.data.as_str() else {
                continue;
            };
            let command: CommandEnvelope = serde_json::from_str(raw).unwrap();
            let mut response = result.clone();
            response["command"] = json!(command.action);
            let encoded = Value::String(response.to_string());

            tokio::time::sleep(delay).await;
            match reply {
                Reply::Keyed => {
                    let key = event.path.last().unwrap();
                    store.set(&responses.child(key).unwrap(), encoded).unwrap();
                }
                Reply::Appended => {
                    store.push(&responses, encoded).await.unwrap();
                }
            }
        }
    })
}

fn config(correlation: CorrelationMode, wait: WaitMode) -> RelayConfig {
    RelayConfig {
        user_id: "phone".into(),
        correlation,
        wait_strategy: wait,
        ..RelayConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn get_location_scenario_by_action() {
    let store = Arc::new(MemoryStore::new());
    let agent = spawn_agent(
        Arc::clone(&store),
        "phone",
        Reply::Appended,
        Duration::from_secs(2),
        json!({"lat": 1.0, "lon": 2.0}),
    );
    tokio::task::yield_now().await;

    let dispatcher = Dispatcher::new(Arc::clone(&store));
    let correlator = Correlator::new(
        Arc::clone(&store),
        (&config(CorrelationMode::Action, WaitMode::Poll)).into(),
    );

    dispatcher.dispatch("phone", "GET_LOCATION", None).await.unwrap();
    let outcome = correlator
        .await_response(
            "phone",
            &Correlation::action("GET_LOCATION"),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let AwaitOutcome::Matched(response) = outcome else {
        panic!("expected a response");
    };
    assert_eq!(
        response.into_value(),
        json!({"command": "GET_LOCATION", "lat": 1.0, "lon": 2.0})
    );
    let responses = StorePath::responses("phone").unwrap();
    assert_eq!(store.child_count(&responses).unwrap(), 0);

    agent.abort();
}

#[tokio::test(start_paused = true)]
async fn client_correlates_by_key() {
    let store = Arc::new(MemoryStore::new());
    let agent = spawn_agent(
        Arc::clone(&store),
        "phone",
        Reply::Keyed,
        Duration::from_secs(1),
        json!({"status": "success", "data": "Camera stream started"}),
    );
    tokio::task::yield_now().await;

    let client = CommandClient::new(
        Arc::clone(&store),
        &config(CorrelationMode::Key, WaitMode::Watch),
    );
    let report = client.send("STREAM_CAMERA", None).await.unwrap();

    let response = report.outcome.into_response().unwrap();
    assert!(response.answers("STREAM_CAMERA"));
    assert_eq!(response.status(), Some("success"));

    let consumed = StorePath::responses("phone")
        .unwrap()
        .child(report.key.as_str())
        .unwrap();
    assert!(store.get(&consumed).await.unwrap().is_none());

    agent.abort();
}

#[tokio::test(start_paused = true)]
async fn offline_agent_times_out() {
    let store = Arc::new(MemoryStore::new());
    let client = CommandClient::new(
        Arc::clone(&store),
        &config(CorrelationMode::Key, WaitMode::Poll),
    )
    .with_timeout(Duration::from_secs(3));

    let report = client.send("VIBRATE", None).await.unwrap();
    assert!(report.outcome.is_timed_out());

    // The command stays behind for a later agent.
    let commands = StorePath::commands("phone").unwrap();
    assert_eq!(store.child_count(&commands).unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_commands_with_keys_do_not_cross() {
    let store = Arc::new(MemoryStore::new());
    let agent = spawn_agent(
        Arc::clone(&store),
        "phone",
        Reply::Keyed,
        Duration::from_millis(200),
        json!({"status": "success"}),
    );
    tokio::task::yield_now().await;

    let client = Arc::new(CommandClient::new(
        Arc::clone(&store),
        &config(CorrelationMode::Key, WaitMode::Poll),
    ));
    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.send("TOGGLE_WIFI", None).await.unwrap() })
    };
    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.send("TOGGLE_WIFI", None).await.unwrap() })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_ne!(first.key, second.key);
    assert!(!first.outcome.is_timed_out());
    assert!(!second.outcome.is_timed_out());

    agent.abort();
}
