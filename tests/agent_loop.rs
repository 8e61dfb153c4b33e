mod common;

use common::{task_envelope, MockController};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use wayfarer_agent::config::{ChannelConfig, Transport};
use wayfarer_agent::protocol::{ResultStatus, TaskResult};
use wayfarer_agent::AgentCore;

fn poll_config(controller: &MockController) -> ChannelConfig {
    ChannelConfig {
        transport: Transport::Http,
        host: controller.host(),
        port: controller.port(),
        poll_interval: Duration::from_millis(50),
        jitter: 0.0,
        ..ChannelConfig::default()
    }
}

#[tokio::test]
async fn poll_agent_serves_tasks_and_flags_unknown_commands() {
    let controller = MockController::start().await;
    controller.push_task(task_envelope("t-1", "ping", json!({})));
    controller.push_task(task_envelope("t-2", "frobnicate", json!({})));

    // Beacon mode on: the client is dropped after every exchange, so two
    // served cycles also prove the next cycle survives the drop.
    let config = ChannelConfig {
        beacon: true,
        ..poll_config(&controller)
    };
    let mut agent = AgentCore::new(config).unwrap();
    let identity = agent.identity();
    let stop = agent.stop_handle();
    let handle = tokio::spawn(async move { agent.run().await });

    let results = controller.results_at_least(2, Duration::from_secs(10)).await;

    let first: TaskResult = serde_json::from_value(results[0].clone()).unwrap();
    assert_eq!(first.task_id, "t-1");
    assert_eq!(first.status, ResultStatus::Completed);
    assert_eq!(first.output.unwrap()["agent_id"], identity.to_string());

    let second: TaskResult = serde_json::from_value(results[1].clone()).unwrap();
    assert_eq!(second.task_id, "t-2");
    assert_eq!(second.status, ResultStatus::UnknownCommand);
    assert!(second.error.unwrap().contains("frobnicate"));

    stop.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent failed to stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn duplex_agent_serves_pushed_tasks() {
    let controller = MockController::start().await;
    controller.push_task(task_envelope("t-5", "ping", json!({})));

    let config = ChannelConfig {
        transport: Transport::Ws,
        ..poll_config(&controller)
    };
    let mut agent = AgentCore::new(config).unwrap();
    let stop = agent.stop_handle();
    let handle = tokio::spawn(async move { agent.run().await });

    let results = controller.results_at_least(1, Duration::from_secs(10)).await;
    let result: TaskResult = serde_json::from_value(results[0].clone()).unwrap();
    assert_eq!(result.task_id, "t-5");
    assert_eq!(result.status, ResultStatus::Completed);

    stop.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent failed to stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn hop_to_duplex_hands_the_loop_over() {
    let poll_home = MockController::start().await;
    let duplex_home = MockController::start().await;

    poll_home.push_task(task_envelope(
        "hop-1",
        "hop",
        json!({
            "transport": "ws",
            "host": duplex_home.host(),
            "port": duplex_home.port(),
        }),
    ));

    let mut agent = AgentCore::new(poll_config(&poll_home)).unwrap();
    let stop = agent.stop_handle();
    let handle = tokio::spawn(async move { agent.run().await });

    // The hop acknowledgement lands on the pre-hop channel.
    let results = poll_home.results_at_least(1, Duration::from_secs(10)).await;
    let ack: TaskResult = serde_json::from_value(results[0].clone()).unwrap();
    assert_eq!(ack.task_id, "hop-1");
    assert_eq!(ack.status, ResultStatus::Completed);
    assert_eq!(ack.output.unwrap()["transport"], "ws");

    // The poll loop hands over to the duplex loop on the new channel…
    duplex_home
        .ws_connections_at_least(1, Duration::from_secs(10))
        .await;

    // …and tasking flows there.
    duplex_home.push_task(task_envelope("t-9", "ping", json!({})));
    let results = duplex_home
        .results_at_least(1, Duration::from_secs(10))
        .await;
    let result: TaskResult = serde_json::from_value(results[0].clone()).unwrap();
    assert_eq!(result.task_id, "t-9");
    assert_eq!(result.status, ResultStatus::Completed);

    stop.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent failed to stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn stop_is_idempotent_and_run_exits_cleanly() {
    // Never dialed: stop fires before the first check-in.
    let mut agent = AgentCore::new(ChannelConfig::default()).unwrap();
    let stop = agent.stop_handle();
    stop.stop();
    stop.stop();

    timeout(Duration::from_secs(1), agent.run())
        .await
        .expect("run did not observe stop")
        .unwrap();
}
