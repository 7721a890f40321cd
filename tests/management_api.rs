//! Integration tests for the channel management API over a real listener.

mod common;

use chrono::Utc;
use common::fakes::user;
use common::{CHANNEL, CHANNEL_ID, LLM_TOKEN, TestAgent};
use serde_json::json;
use std::time::Duration;
use straybot::db::Scope;
use straybot::http::{ApprovalView, ChannelSummary, ChannelView, CommandView, MASKED_TOKEN};
use straybot::services::PlatformUser;

fn account(id: &str, login: &str, display_name: &str) -> PlatformUser {
    PlatformUser {
        display_name: display_name.into(),
        ..user(id, login, Utc::now() - chrono::Duration::days(365))
    }
}

/// Agent with tokens for the channel owner `alice`, a viewer `dave` and
/// the admin `root`.
async fn agent() -> TestAgent {
    let agent = TestAgent::new().await;
    agent.platform.add_token("alice-token", account(CHANNEL_ID, CHANNEL, "Alice"));
    agent.platform.add_token("dave-token", account("200", "dave", "Dave"));
    agent.platform.add_token("root-token", account("9", "root", "Root"));
    agent
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_reads_are_public() {
    let agent = agent().await;
    let base = agent.serve("").await;

    let channels: Vec<ChannelSummary> = client()
        .get(format!("{}/channels", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].channel_id, CHANNEL_ID);
    assert_eq!(channels[0].display_name, "Alice");

    let response = client().get(format!("{}/channels/{}", base, CHANNEL_ID)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let view: ChannelView = response.json().await.unwrap();
    assert_eq!(view.login, CHANNEL);
    assert!(!view.autoreply_enabled);
    assert!(view.llm_token.is_none());

    let missing = client().get(format!("{}/channels/404", base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    let malformed = client().get(format!("{}/channels/alice", base)).send().await.unwrap();
    assert_eq!(malformed.status(), 400);
}

#[tokio::test]
async fn test_register_needs_the_channel_owner() {
    let agent = agent().await;
    let base = agent.serve("").await;
    let url = format!("{}/channels/200", base);

    let anonymous = client().put(&url).send().await.unwrap();
    assert_eq!(anonymous.status(), 401);
    let bad_token = client().put(&url).bearer_auth("forged").send().await.unwrap();
    assert_eq!(bad_token.status(), 401);
    let someone_else = client().put(&url).bearer_auth("alice-token").send().await.unwrap();
    assert_eq!(someone_else.status(), 403);
    assert!(agent.hub.db.channels().find_by_id("200").await.unwrap().is_none());

    let response = client()
        .put(&url)
        .header("Authorization", "OAuth dave-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let view: ChannelView = response.json().await.unwrap();
    assert_eq!(view.login, "dave");
    assert_eq!(*agent.transport.joins.lock().unwrap(), vec!["dave".to_string()]);
    assert_eq!(agent.hub.room_id("dave").as_deref(), Some("200"));

    // The greeting follows after a short pause.
    let mut greeted = false;
    for _ in 0..40 {
        if agent
            .transport
            .sent()
            .iter()
            .any(|s| s.channel == "dave" && s.text == "Hi Dave 👋")
        {
            greeted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(greeted);
}

#[tokio::test]
async fn test_patch_validates_before_writing() {
    let agent = agent().await;
    let base = agent.serve("").await;
    let url = format!("{}/channels/{}", base, CHANNEL_ID);

    let out_of_range = client()
        .patch(&url)
        .bearer_auth("alice-token")
        .json(&json!({"autoreply_enabled": true, "autoreply_frequency": 9}))
        .send()
        .await
        .unwrap();
    assert_eq!(out_of_range.status(), 400);
    let bad_token = client()
        .patch(&url)
        .bearer_auth("alice-token")
        .json(&json!({"autoreply_enabled": true, "llm_token": "hunter2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_token.status(), 400);
    assert!(!agent.hub.db.channels().settings(CHANNEL_ID).await.unwrap().autoreply_enabled);

    let viewer = client()
        .patch(&url)
        .bearer_auth("dave-token")
        .json(&json!({"reply_safety": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(viewer.status(), 403);

    let response = client()
        .patch(&url)
        .bearer_auth("alice-token")
        .json(&json!({"autoreply_enabled": true, "autoreply_frequency": 3, "llm_token": LLM_TOKEN}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let view: ChannelView = response.json().await.unwrap();
    assert!(view.autoreply_enabled);
    assert_eq!(view.autoreply_frequency, 3);
    assert_eq!(view.llm_token.as_deref(), Some(MASKED_TOKEN));

    // Admins may change any channel; omitted fields are kept.
    let response = client()
        .patch(&url)
        .bearer_auth("root-token")
        .json(&json!({"reply_safety": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let settings = agent.hub.db.channels().settings(CHANNEL_ID).await.unwrap();
    assert_eq!(settings.reply_safety, 2);
    assert_eq!(settings.autoreply_frequency, 3);
    assert_eq!(settings.llm_token.as_deref(), Some(LLM_TOKEN));
}

#[tokio::test]
async fn test_unregister_says_bye_and_parts() {
    let agent = agent().await;
    let base = agent.serve("").await;
    let url = format!("{}/channels/{}", base, CHANNEL_ID);

    let viewer = client().delete(&url).bearer_auth("dave-token").send().await.unwrap();
    assert_eq!(viewer.status(), 403);

    let response = client().delete(&url).bearer_auth("alice-token").send().await.unwrap();
    assert_eq!(response.status(), 204);

    let sent = agent.transport.sent();
    let farewell = sent.last().unwrap();
    assert_eq!(farewell.channel, CHANNEL);
    assert_eq!(farewell.text, "Bye Alice 👋");
    assert_eq!(*agent.transport.parts.lock().unwrap(), vec![CHANNEL.to_string()]);
    assert!(agent.hub.db.channels().find_by_id(CHANNEL_ID).await.unwrap().is_none());
    assert!(agent.hub.room_id(CHANNEL).is_none());

    let again = client().delete(&url).bearer_auth("alice-token").send().await.unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn test_command_and_approval_listings() {
    let agent = agent().await;
    let commands = agent.hub.db.commands();
    commands.upsert(&Scope::channel(CHANNEL_ID), "^!hi", "hello").await.unwrap();
    commands.upsert(&Scope::Global, "^!ping", "pong").await.unwrap();
    agent.hub.db.approvals().approve(CHANNEL_ID, "200", true).await.unwrap();
    let base = agent.serve("").await;

    let local: Vec<CommandView> = client()
        .get(format!("{}/channels/{}/commands", base, CHANNEL_ID))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        local,
        vec![CommandView {
            name: "^!hi".into(),
            template: "hello".into()
        }]
    );

    let global: Vec<CommandView> = client()
        .get(format!("{}/commands", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].name, "^!ping");

    let approvals: Vec<ApprovalView> = client()
        .get(format!("{}/channels/{}/approvals", base, CHANNEL_ID))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].login.as_deref(), Some("dave"));
    assert!(approvals[0].manual);
}

#[tokio::test]
async fn test_management_can_be_disabled() {
    let agent = agent().await;
    let base = agent.serve("management = false").await;

    let response = client().get(format!("{}/channels", base)).send().await.unwrap();
    assert_eq!(response.status(), 404);
}
