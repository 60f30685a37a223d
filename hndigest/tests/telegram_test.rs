use mockito::Matcher;

use hndigest::delivery::Transport;
use hndigest::error::DigestError;
use hndigest::model::DeliveryHandle;
use hndigest::telegram::events::{decode, InboundEvent};
use hndigest::telegram::TelegramClient;

#[tokio::test]
async fn deliver_returns_message_id_as_handle() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/bottest-token/sendMessage")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "chat_id": "4242",
            "text": "<b>hello</b>",
            "parse_mode": "HTML"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"ok": true, "result": {"message_id": 901, "date": 0,
                "chat": {"id": 4242, "type": "private"}, "text": "hello"}}"#,
        )
        .create_async()
        .await;

    let client = TelegramClient::new(server.url(), "test-token").unwrap();
    let handle = client.deliver("4242", "<b>hello</b>").await.unwrap();
    assert_eq!(handle, DeliveryHandle("901".to_string()));

    mock.assert_async().await;
}

#[tokio::test]
async fn bad_chat_maps_to_invalid_recipient() {
    let mut server = mockito::Server::new_async().await;

    for (status, description) in [(400, "Bad Request: chat not found"), (403, "Forbidden: bot was blocked by the user")] {
        let mock = server
            .mock("POST", "/bottest-token/sendMessage")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"ok": false, "error_code": {}, "description": "{}"}}"#,
                status, description
            ))
            .create_async()
            .await;

        let client = TelegramClient::new(server.url(), "test-token").unwrap();
        let err = client.deliver("1", "hi").await.unwrap_err();
        assert!(matches!(err, DigestError::InvalidRecipient(_)), "got {:?}", err);
        assert!(err.to_string().contains(description));

        mock.remove_async().await;
    }
}

#[tokio::test]
async fn server_errors_are_unavailable() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/bottest-token/sendMessage")
        .with_status(502)
        .with_body("Bad Gateway")
        .create_async()
        .await;

    let client = TelegramClient::new(server.url(), "test-token").unwrap();
    let err = client.deliver("1", "hi").await.unwrap_err();
    assert!(matches!(err, DigestError::Unavailable(_)), "got {:?}", err);
    assert!(!err.to_string().contains("test-token"));
}

#[tokio::test]
async fn get_updates_decodes_messages_and_reactions() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/bottest-token/getUpdates")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "offset": 17,
            "timeout": 0,
            "allowed_updates": ["message", "message_reaction"]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"ok": true, "result": [
                {"update_id": 17, "message": {"message_id": 3, "date": 0,
                    "chat": {"id": 4242, "type": "private"},
                    "from": {"id": 4242, "is_bot": false, "first_name": "R"},
                    "text": "/stats"}},
                {"update_id": 18, "message_reaction": {"chat": {"id": 4242, "type": "private"},
                    "message_id": 901, "date": 0, "old_reaction": [],
                    "new_reaction": [{"type": "emoji", "emoji": "👍"}]}}
            ]}"#,
        )
        .create_async()
        .await;

    let client = TelegramClient::new(server.url(), "test-token").unwrap();
    let updates = client.get_updates(17, 0).await.unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].update_id, 18);

    let events: Vec<InboundEvent> = updates.into_iter().filter_map(decode).collect();
    match &events[..] {
        [InboundEvent::Message(m), InboundEvent::Reaction(r)] => {
            assert_eq!(m.text, "/stats");
            assert_eq!(m.sender.as_deref(), Some("4242"));
            assert_eq!(r.message_id, 901);
            assert_eq!(r.added, vec!["👍".to_string()]);
        }
        other => panic!("unexpected events: {:?}", other),
    }

    mock.assert_async().await;
}
