use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sophia_backend::{
    Attachment, Backend, ConversationId, ErrorKind as BackendErrorKind,
    PromptReply, Role,
};
use sophia_test_backend::{Endpoint, Error as TestError, TestBackend};
use tokio::sync::mpsc;
use tokio::task::yield_now;
use tokio::time::timeout;

use crate::conversation::{ConversationKind, DEFAULT_TITLE};
use crate::{ConversationStore, ErrorKind, Gateway, StoreSnapshot};

fn fixture() -> TestBackend {
    let backend = TestBackend::default();
    backend.set_credential(Some("token"));
    backend.add_conversation("A", Some("Foo"), Some("chat"));
    backend.add_conversation("B", None, Some("summarize"));
    backend.add_message("A", Role::User, "hi");
    backend
}

fn build(backend: &TestBackend) -> ConversationStore {
    ConversationStore::builder(Gateway::new(backend.clone()))
        .refresh_on_start(false)
        .build()
}

fn id(s: &str) -> ConversationId {
    ConversationId::new(s)
}

async fn wait_for_calls(backend: &TestBackend, endpoint: Endpoint, n: usize) {
    while backend.calls(endpoint) < n {
        yield_now().await;
    }
}

#[tokio::test]
async fn test_refresh_builds_shells() {
    let backend = fixture();
    let store = build(&backend);

    store.list_conversations().await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    let list = snapshot.conversations();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].title(), "Foo");
    assert_eq!(list[1].title(), DEFAULT_TITLE);
    assert_eq!(list[1].kind(), &ConversationKind::Summarize);
    assert!(list.iter().all(|c| !c.is_loaded() && c.messages().is_empty()));

    store.list_conversations().await.unwrap();
    assert_eq!(store.snapshot().await.unwrap(), snapshot);
    assert_eq!(backend.calls(Endpoint::ListConversations), 2);
}

#[tokio::test]
async fn test_activation_loads_once() {
    let backend = fixture();
    let store = build(&backend);
    store.list_conversations().await.unwrap();

    store.activate(Some(id("A"))).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    let active = snapshot.active_conversation().unwrap();
    assert!(active.is_loaded());
    assert_eq!(active.messages().len(), 1);
    assert_eq!(active.messages()[0].role(), Role::User);
    assert_eq!(active.messages()[0].content(), "hi");

    store.activate(Some(id("B"))).await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();
    assert_eq!(backend.calls(Endpoint::ConversationMessages), 2);
}

#[tokio::test(start_paused = true)]
async fn test_activations_coalesce() {
    let backend = fixture();
    backend.set_delay(Endpoint::ConversationMessages, Duration::from_secs(1));
    let store = build(&backend);
    store.list_conversations().await.unwrap();

    let (first, second) = tokio::join!(
        store.activate(Some(id("A"))),
        store.activate(Some(id("A"))),
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(backend.calls(Endpoint::ConversationMessages), 1);
}

#[tokio::test]
async fn test_at_most_one_draft() {
    let backend = fixture();
    let changes = Arc::new(AtomicUsize::new(0));
    let store = ConversationStore::builder(Gateway::new(backend.clone()))
        .refresh_on_start(false)
        .on_change({
            let changes = Arc::clone(&changes);
            move |_| {
                changes.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build();
    store.list_conversations().await.unwrap();

    store.create_draft(ConversationKind::Chat).unwrap();
    store.create_draft(ConversationKind::Creative).unwrap();
    let snapshot = store.snapshot().await.unwrap();
    let drafts = snapshot.conversations().iter().filter(|c| c.is_draft());
    assert_eq!(drafts.count(), 1);
    assert!(snapshot.conversations()[0].is_draft());
    assert_eq!(snapshot.conversations().len(), 3);

    let active = snapshot.active_conversation().unwrap();
    assert!(active.is_draft());
    assert_eq!(active.kind(), &ConversationKind::Creative);
    assert_eq!(changes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_blank_send_is_noop() {
    let backend = fixture();
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();
    let before = store.snapshot().await.unwrap();
    let calls = backend.total_calls();

    assert_eq!(store.send_message(" \n\t", vec![]).await.unwrap(), None);
    assert_eq!(store.snapshot().await.unwrap(), before);
    assert_eq!(backend.total_calls(), calls);
}

#[tokio::test]
async fn test_draft_send_is_local() {
    let backend = fixture();
    let store = build(&backend);
    store.create_draft(ConversationKind::Chat).unwrap();

    let reply = store.send_message("Hello", vec![]).await.unwrap().unwrap();
    assert_eq!(reply.content(), "AI response will appear here");

    let snapshot = store.snapshot().await.unwrap();
    let draft = snapshot.draft().unwrap();
    assert_eq!(draft.messages().len(), 2);
    assert_eq!(draft.messages()[0].content(), "Hello");
    assert_eq!(draft.messages()[1].role(), Role::Assistant);
    assert_eq!(backend.total_calls(), 0);
}

#[tokio::test]
async fn test_failed_send_leaves_messages() {
    let backend = fixture();
    backend.fail(
        Endpoint::SendPrompt,
        TestError::new(BackendErrorKind::Transport),
    );
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();

    let err = store.send_message("Hello", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.get(&id("A")).unwrap().messages().len(), 1);
    assert!(!snapshot.is_processing());
}

#[tokio::test]
async fn test_send_appends_and_adopts_title() {
    let backend = fixture();
    backend.push_prompt_reply(PromptReply {
        response: None,
        conversation_name: Some("Poems".to_owned()),
        conversation_type: Some("creative".to_owned()),
    });
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("B"))).await.unwrap();

    let files = vec![Attachment::new("draft.txt", "roses are red")];
    let reply = store.send_message("", files).await.unwrap().unwrap();
    assert_eq!(reply.content(), "No response from AI");

    let snapshot = store.snapshot().await.unwrap();
    let conversation = snapshot.get(&id("B")).unwrap();
    assert_eq!(conversation.title(), "Poems");
    assert_eq!(conversation.kind(), &ConversationKind::Creative);
    let user_msg = &conversation.messages()[0];
    assert_eq!(user_msg.content(), "draft.txt");
    assert_eq!(user_msg.attachments()[0].size, 13);

    let prompts = backend.prompts();
    assert_eq!(prompts[0].conversation_id, id("B"));
    assert_eq!(prompts[0].attachments.len(), 1);
}

#[tokio::test]
async fn test_send_without_active_conversation() {
    let backend = fixture();
    let store = build(&backend);
    store.list_conversations().await.unwrap();

    let err = store.send_message("Hello", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveConversation);

    // A pointer to a missing conversation resolves to nothing.
    store.set_active(Some(id("Z"))).unwrap();
    let err = store.send_message("Hello", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveConversation);
    assert_eq!(backend.calls(Endpoint::SendPrompt), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sends_are_queued_in_order() {
    let backend = fixture();
    backend.set_delay(Endpoint::SendPrompt, Duration::from_millis(200));
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();

    let (one, two) = tokio::join!(
        store.send_message("one", vec![]),
        store.send_message("two", vec![]),
    );
    assert_eq!(one.unwrap().unwrap().content(), "You said one");
    assert_eq!(two.unwrap().unwrap().content(), "You said two");

    let snapshot = store.snapshot().await.unwrap();
    let contents: Vec<_> = snapshot
        .get(&id("A"))
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.content().to_owned())
        .collect();
    assert_eq!(
        contents,
        ["hi", "one", "You said one", "two", "You said two"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_restarts_fetch() {
    let backend = fixture();
    backend.set_delay(Endpoint::ConversationMessages, Duration::from_secs(1));
    let store = build(&backend);
    store.list_conversations().await.unwrap();

    let activating = tokio::spawn({
        let store = store.clone();
        async move { store.activate(Some(id("A"))).await }
    });
    wait_for_calls(&backend, Endpoint::ConversationMessages, 1).await;

    store.send_message("Yo", vec![]).await.unwrap();
    activating.await.unwrap().unwrap();
    assert_eq!(backend.calls(Endpoint::ConversationMessages), 2);

    let snapshot = store.snapshot().await.unwrap();
    let messages = snapshot.get(&id("A")).unwrap().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].content(), "You said Yo");
}

fn contents(snapshot: &StoreSnapshot, id: &ConversationId) -> Vec<String> {
    snapshot
        .get(id)
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.content().to_owned())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_history_reloaded_during_send() {
    let backend = fixture();
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();

    backend.set_delay(Endpoint::SendPrompt, Duration::from_secs(2));
    let sending = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("Yo", vec![]).await }
    });
    wait_for_calls(&backend, Endpoint::SendPrompt, 1).await;

    // The server already holds the new turn when the history is reloaded.
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.is_processing());
    assert_eq!(contents(&snapshot, &id("A")), ["hi", "Yo", "You said Yo"]);

    let reply = sending.await.unwrap().unwrap().unwrap();
    assert_eq!(reply.content(), "You said Yo");
    assert_eq!(backend.calls(Endpoint::ConversationMessages), 3);
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(contents(&snapshot, &id("A")), ["hi", "Yo", "You said Yo"]);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(contents(&snapshot, &id("A")), ["hi", "Yo", "You said Yo"]);
    assert!(snapshot.get(&id("A")).unwrap().is_loaded());
}

#[tokio::test(start_paused = true)]
async fn test_processing_flag_during_send() {
    let backend = fixture();
    backend.set_delay(Endpoint::SendPrompt, Duration::from_secs(1));
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();
    assert!(!store.snapshot().await.unwrap().is_processing());

    let sending = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("Hello", vec![]).await }
    });
    wait_for_calls(&backend, Endpoint::SendPrompt, 1).await;
    assert!(store.snapshot().await.unwrap().is_processing());

    sending.await.unwrap().unwrap();
    assert!(!store.snapshot().await.unwrap().is_processing());
}

#[tokio::test(start_paused = true)]
async fn test_stale_refresh_is_discarded() {
    let backend = fixture();
    backend.set_delay(Endpoint::ListConversations, Duration::from_secs(1));
    let store = build(&backend);

    let slow = tokio::spawn({
        let store = store.clone();
        async move { store.list_conversations().await }
    });
    wait_for_calls(&backend, Endpoint::ListConversations, 1).await;

    backend.set_delay(Endpoint::ListConversations, Duration::ZERO);
    backend.add_conversation("C", Some("Bar"), None);
    store.list_conversations().await.unwrap();
    assert_eq!(store.snapshot().await.unwrap().conversations().len(), 3);

    slow.await.unwrap().unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.conversations().len(), 3);
    assert_eq!(snapshot.get(&id("C")).unwrap().title(), "Bar");
}

#[tokio::test]
async fn test_delete_draft_is_local() {
    let backend = fixture();
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.create_draft(ConversationKind::Chat).unwrap();

    store.delete_conversation(None).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.draft().is_none());
    assert!(snapshot.get(&id("A")).is_some());
    assert_eq!(backend.calls(Endpoint::DeleteConversation), 0);
}

#[tokio::test]
async fn test_delete_failure_keeps_state() {
    let backend = fixture();
    backend.fail(
        Endpoint::DeleteConversation,
        TestError::new(BackendErrorKind::Server)
            .with_payload(serde_json::json!({ "error": "Forbidden" })),
    );
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.set_active(Some(id("A"))).unwrap();

    let err = store.delete_conversation(Some(id("A"))).await.unwrap_err();
    assert_eq!(err.display_message(), "Forbidden");
    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.get(&id("A")).is_some());
    assert_eq!(snapshot.active_id(), Some(&id("A")));
}

#[tokio::test(start_paused = true)]
async fn test_delete_cancels_fetch() {
    let backend = fixture();
    backend.set_delay(Endpoint::ConversationMessages, Duration::from_secs(1));
    let store = build(&backend);
    store.list_conversations().await.unwrap();

    let activating = tokio::spawn({
        let store = store.clone();
        async move { store.activate(Some(id("A"))).await }
    });
    wait_for_calls(&backend, Endpoint::ConversationMessages, 1).await;

    store.delete_conversation(Some(id("A"))).await.unwrap();
    let err = activating.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.get(&id("A")).is_none());
    assert!(snapshot.active_id().is_none());
    assert!(snapshot.active_conversation().is_none());
}

#[tokio::test]
async fn test_refresh_drops_draft_and_vanished_pointer() {
    let backend = fixture();
    let store = build(&backend);
    store.list_conversations().await.unwrap();
    store.activate(Some(id("A"))).await.unwrap();
    store.create_draft(ConversationKind::Chat).unwrap();
    store.set_active(Some(id("A"))).unwrap();

    backend.delete_conversation(&id("A")).await.unwrap();
    store.list_conversations().await.unwrap();

    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.draft().is_none());
    assert!(snapshot.active_id().is_none());
    assert_eq!(snapshot.conversations().len(), 1);
}

#[tokio::test]
async fn test_unobserved_failures_are_reported() {
    let backend = fixture();
    backend.fail(
        Endpoint::ListConversations,
        TestError::new(BackendErrorKind::Transport),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _store = ConversationStore::builder(Gateway::new(backend.clone()))
        .on_error(move |err| {
            tx.send(err.kind()).ok();
        })
        .build();

    let kind = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kind, ErrorKind::Transport);
}

#[tokio::test]
async fn test_background_fetch_failure() {
    let backend = fixture();
    backend.fail(
        Endpoint::ConversationMessages,
        TestError::new(BackendErrorKind::Server),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let store = ConversationStore::builder(Gateway::new(backend.clone()))
        .refresh_on_start(false)
        .on_error(move |err| {
            tx.send(err.kind()).ok();
        })
        .build();
    store.list_conversations().await.unwrap();

    store.set_active(Some(id("A"))).unwrap();
    assert_eq!(rx.recv().await, Some(ErrorKind::Server));
    let snapshot = store.snapshot().await.unwrap();
    assert!(!snapshot.get(&id("A")).unwrap().is_loaded());

    backend.recover(Endpoint::ConversationMessages);
    store.activate(Some(id("A"))).await.unwrap();
    let snapshot = store.snapshot().await.unwrap();
    assert!(snapshot.get(&id("A")).unwrap().is_loaded());
}

#[tokio::test]
async fn test_shutdown_closes_store() {
    let backend = fixture();
    let store = build(&backend);
    store.shutdown();

    let err = store.snapshot().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
}
