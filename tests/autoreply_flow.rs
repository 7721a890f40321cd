//! Integration tests for spontaneous and threaded autoreplies.

mod common;

use common::{AGENT_LOGIN, CHANNEL_ID, TestAgent, message, owner_message, reply_to_agent};
use straybot::handlers::Invocation;
use straybot::handlers::reply::{PromptSource, conversational_reply};
use straybot::state::ConversationEvent;

/// Nine events from four viewers, so the next message is the tenth.
async fn seed_history(agent: &TestAgent) {
    let history = agent.hub.conversations.get_or_create(CHANNEL_ID);
    let speakers = ["bob", "carol", "dave", "erin"];
    for i in 0..9 {
        let who = speakers[i % speakers.len()];
        history
            .append(ConversationEvent::new(
                format!("seed-{}", i),
                format!("id-{}", who),
                who,
                format!("message number {}", i),
            ))
            .await;
    }
}

#[tokio::test]
async fn test_autoreply_fires_then_holds_back() {
    let agent = TestAgent::new().await;
    agent.enable_autoreply(3).await;
    seed_history(&agent).await;

    agent.say(message("bob", "anyone seen the new patch?")).await;

    assert_eq!(agent.sent(), vec!["sounds like fun!"]);
    let prompts = agent.llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("straybot is "));
    assert!(prompts[0].contains("in alice's twitch stream chat replying to bob."));
    assert!(prompts[0].contains("bob: anyone seen the new patch?"));
    assert!(prompts[0].ends_with("straybot:"));

    // The agent's line is now the newest event: nothing more to say.
    let history = agent.hub.conversations.get_or_create(CHANNEL_ID);
    assert_eq!(history.last_speaker().await.as_deref(), Some(common::AGENT_ID));

    let inv = Invocation::from_message(&message("carol", "hello?"), &agent.hub.config.agent);
    let reply = conversational_reply(&agent.hub, &inv, PromptSource::Conversation).await;
    assert_eq!(reply, "");
    assert_eq!(agent.llm.prompts().len(), 1);
}

#[tokio::test]
async fn test_autoreply_disabled_by_default() {
    let agent = TestAgent::new().await;
    seed_history(&agent).await;

    agent.say(message("bob", "quiet in here")).await;

    assert!(agent.sent().is_empty());
    assert!(agent.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_autoreply_requires_valid_credential() {
    let agent = TestAgent::new().await;
    agent.enable_autoreply(3).await;
    agent
        .hub
        .db
        .channels()
        .set_llm_token(CHANNEL_ID, "not-a-key")
        .await
        .unwrap();
    seed_history(&agent).await;

    agent.say(message("bob", "hello")).await;

    assert!(agent.sent().is_empty());
    assert!(agent.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_reply_to_agent_is_threaded() {
    let agent = TestAgent::new().await;
    agent.enable_autoreply(1).await;

    let msg = reply_to_agent("bob", "what game is this?", "welcome to the stream");
    let msg_id = msg.message_id.clone();
    agent.say(msg).await;

    let sent = agent.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "sounds like fun!");
    assert_eq!(sent[0].parent_id.as_deref(), Some(msg_id.as_str()));

    let prompt = &agent.llm.prompts()[0];
    assert!(prompt.contains(&format!("bob: @{} what game is this?", AGENT_LOGIN)));
    assert!(prompt.ends_with("straybot:"));
}

#[tokio::test]
async fn test_autoreply_settings_builtin() {
    let agent = TestAgent::new().await;

    agent.say(owner_message("!autoreply on")).await;
    agent.say(owner_message("!autoreply frequency 4")).await;
    agent.say(owner_message("!autoreply frequency 9")).await;
    agent.say(owner_message("!autoreply safety 2")).await;

    let token = owner_message(&format!("!autoreply token {}", common::LLM_TOKEN));
    let token_id = token.message_id.clone();
    agent.say(token).await;
    agent.say(owner_message("!autoreply")).await;

    let sent = agent.sent();
    assert_eq!(sent[0], "autoreply enabled");
    assert_eq!(sent[1], "autoreply frequency set to 4");
    assert_ne!(sent[2], "autoreply frequency set to 9");
    assert_eq!(sent[3], "autoreply safety set to 2");
    assert_eq!(sent[4], "token saved");
    assert_eq!(sent[5], "autoreply on, frequency 4, safety 2, token set");

    // The token message is scrubbed from chat.
    let deletes = agent.platform.deletes.lock().unwrap().clone();
    assert_eq!(deletes, vec![Some(token_id)]);

    let settings = agent.hub.db.channels().settings(CHANNEL_ID).await.unwrap();
    assert!(settings.autoreply_enabled);
    assert_eq!(settings.autoreply_frequency, 4);
    assert_eq!(settings.reply_safety, 2);
}
