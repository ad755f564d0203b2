mod common;

use std::sync::Arc;

use aeon::conversation::ConversationView;
use aeon::web_server::{ClientIntent, ConversationDriver, DispatchOutcome, ServerEvent};
use aeon::{DispatchError, Sender};
use common::{text_reply, ScriptedDispatcher};
use tokio::sync::mpsc;

fn driver(
    replies: Vec<Result<aeon::Reply, DispatchError>>,
) -> (ConversationDriver, mpsc::UnboundedReceiver<DispatchOutcome>, Arc<ScriptedDispatcher>) {
    let dispatcher = Arc::new(ScriptedDispatcher::new(replies));
    let (tx, rx) = mpsc::unbounded_channel();
    (ConversationDriver::new(dispatcher.clone(), tx), rx, dispatcher)
}

fn last_state(events: &[ServerEvent]) -> &ConversationView {
    match events.last() {
        Some(ServerEvent::State(view)) => view,
        other => panic!("expected trailing state event, got {other:?}"),
    }
}

async fn settle(driver: &mut ConversationDriver, rx: &mut mpsc::UnboundedReceiver<DispatchOutcome>) -> Vec<ServerEvent> {
    let (ticket, result) = rx.recv().await.expect("dispatch task reports back");
    driver.handle_completion(ticket, result)
}

#[test_log::test(tokio::test)]
async fn test_submit_then_reply() {
    let (mut driver, mut rx, _) = driver(vec![text_reply("Hi! How can I help?", &["Tell me a joke"])]);

    let events = driver.handle_intent(ClientIntent::Submit {
        prompt: Some("hello".to_string()),
    });
    let view = last_state(&events);
    assert!(view.pending);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.draft_text, "");

    let events = settle(&mut driver, &mut rx).await;
    let view = last_state(&events);
    assert!(!view.pending);
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[1].sender, Sender::Assistant);
    assert_eq!(view.messages[1].suggestions, Some(vec!["Tell me a joke".to_string()]));
}

#[tokio::test]
async fn test_submit_uses_draft_when_prompt_absent() {
    let (mut driver, mut rx, dispatcher) = driver(vec![text_reply("ok", &[])]);
    driver.handle_intent(ClientIntent::UpdateDraft {
        text: "from the draft".to_string(),
    });
    driver.handle_intent(ClientIntent::Submit { prompt: None });
    settle(&mut driver, &mut rx).await;

    assert_eq!(driver.conversation().messages()[0].text, "from the draft");
    assert_eq!(dispatcher.requests().len(), 1);
}

#[tokio::test]
async fn test_second_submit_while_pending_is_ignored() {
    let (mut driver, mut rx, dispatcher) = driver(vec![text_reply("first", &[])]);
    driver.handle_intent(ClientIntent::Submit {
        prompt: Some("one".to_string()),
    });
    let events = driver.handle_intent(ClientIntent::Submit {
        prompt: Some("two".to_string()),
    });
    assert_eq!(last_state(&events).messages.len(), 1);

    settle(&mut driver, &mut rx).await;
    assert_eq!(dispatcher.requests().len(), 1);
    assert_eq!(driver.conversation().messages().len(), 2);
}

#[tokio::test]
async fn test_failure_rolls_back_and_toasts() {
    let (mut driver, mut rx, _) = driver(vec![Err(DispatchError::MissingCredentials)]);
    driver.handle_intent(ClientIntent::Submit {
        prompt: Some("hello".to_string()),
    });

    let events = settle(&mut driver, &mut rx).await;
    match &events[0] {
        ServerEvent::Toast { title, description } => {
            assert_eq!(title, "Error");
            assert!(description.starts_with("AI Error:"));
        }
        other => panic!("expected toast, got {other:?}"),
    }
    let view = last_state(&events);
    assert!(view.messages.is_empty());
    assert!(!view.pending);
}

#[tokio::test]
async fn test_new_chat_discards_late_reply() {
    let (mut driver, mut rx, _) = driver(vec![text_reply("too late", &[])]);
    driver.handle_intent(ClientIntent::Submit {
        prompt: Some("hello".to_string()),
    });
    let events = driver.handle_intent(ClientIntent::NewChat);
    assert!(last_state(&events).messages.is_empty());

    let events = settle(&mut driver, &mut rx).await;
    assert_eq!(events.len(), 1);
    let view = last_state(&events);
    assert!(view.messages.is_empty());
    assert!(!view.pending);
}

#[tokio::test]
async fn test_validation_error_becomes_notice() {
    let (mut driver, _rx, dispatcher) = driver(vec![]);
    let events = driver.handle_intent(ClientIntent::Submit {
        prompt: Some("create image".to_string()),
    });
    match &events[0] {
        ServerEvent::Notice { message } => assert_eq!(message, "Please provide a description for the image."),
        other => panic!("expected notice, got {other:?}"),
    }
    assert!(!last_state(&events).pending);
    assert!(dispatcher.requests().is_empty());
}

#[tokio::test]
async fn test_suggestion_click_and_edit() {
    let (mut driver, mut rx, dispatcher) = driver(vec![
        text_reply("Rust is a language.", &["What is Cargo?"]),
        text_reply("Cargo is the build tool.", &[]),
        text_reply("Go is a language.", &[]),
    ]);
    driver.handle_intent(ClientIntent::Submit {
        prompt: Some("what is rust".to_string()),
    });
    settle(&mut driver, &mut rx).await;

    driver.handle_intent(ClientIntent::ClickSuggestion {
        text: "What is Cargo?".to_string(),
    });
    settle(&mut driver, &mut rx).await;
    let messages = driver.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].suggestions, None);

    let first_id = messages[0].id;
    let events = driver.handle_intent(ClientIntent::EditMessage { id: first_id });
    let view = last_state(&events);
    assert_eq!(view.editing_id, Some(first_id));
    assert_eq!(view.draft_text, "what is rust");

    driver.handle_intent(ClientIntent::Submit {
        prompt: Some("what is go".to_string()),
    });
    settle(&mut driver, &mut rx).await;
    let messages = driver.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].text, "what is go");
    assert_eq!(messages[1].text, "Go is a language.");
    assert_eq!(dispatcher.requests().len(), 3);
}

#[tokio::test]
async fn test_staging_attachment_intents() {
    let (mut driver, _rx, _) = driver(vec![]);
    let events = driver.handle_intent(ClientIntent::StageAttachment {
        filename: "fox.png".to_string(),
        data_uri: "data:image/png;base64,AQID".to_string(),
    });
    let staging = last_state(&events).staging.clone().expect("staged");
    assert_eq!(staging.filename, "fox.png");
    assert_eq!(staging.preview, "data:image/png;base64,AQID");

    let events = driver.handle_intent(ClientIntent::StageAttachment {
        filename: "a.zip".to_string(),
        data_uri: "data:application/zip;base64,UEs=".to_string(),
    });
    assert!(matches!(&events[0], ServerEvent::Toast { title, .. } if title == "Attachment rejected"));
    assert!(last_state(&events).staging.is_some());

    let events = driver.handle_intent(ClientIntent::ClearAttachment);
    assert!(last_state(&events).staging.is_none());
}
