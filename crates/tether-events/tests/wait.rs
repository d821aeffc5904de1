//! Awaiting messages through a wait handle.

use std::time::Duration;

use tether_events::EventBus;
use tether_test::{Numbered, TestMessage, setup_test_logging_default};

#[tokio::test]
async fn test_wait_collects_messages_raised_before_resume() {
    setup_test_logging_default();
    let bus = EventBus::new();
    let handle = bus.listen_wait::<Numbered>();
    assert!(handle.messages().is_none());

    let raiser = bus.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(raiser.raise(Numbered(1)));
        assert!(raiser.raise(Numbered(2)));
    });

    // Both raises happen before this task is polled again.
    let messages = handle.wait().await;
    task.await.unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages, vec![Numbered(1), Numbered(2)]);
    assert_eq!(handle.first(), Some(messages[0]));

    handle.dispose();
    assert!(!bus.raise(Numbered(3)));
    assert_eq!(handle.messages(), Some(vec![Numbered(1), Numbered(2)]));
}

#[tokio::test]
async fn test_wait_resolves_immediately_when_buffered() {
    let bus = EventBus::new();
    let handle = bus.listen_wait::<TestMessage>();

    assert!(bus.raise(TestMessage));
    let messages = (&handle).await;
    assert_eq!(messages, vec![TestMessage]);
}

#[tokio::test]
async fn test_wait_does_not_resolve_after_dispose() {
    let bus = EventBus::new();
    let handle = bus.listen_wait::<TestMessage>();
    handle.dispose();

    assert!(!bus.raise(TestMessage));
    let result = tokio::time::timeout(Duration::from_millis(20), handle.wait()).await;
    assert!(result.is_err());
    assert!(handle.messages().is_none());
}

#[tokio::test]
async fn test_raise_after_dispose_reaches_other_listeners() {
    let bus = EventBus::new();
    let handle = bus.listen_wait::<TestMessage>();
    let _other = bus.listen_manual(|_msg: &TestMessage| {});

    handle.dispose();
    assert!(bus.raise(TestMessage));
    assert!(handle.is_empty());
}
