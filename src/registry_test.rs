use super::*;

fn authed() -> (Connection, mpsc::Receiver<Arc<str>>) {
    let (tx, rx) = mpsc::channel(8);
    let mut conn = Connection::new(tx);
    conn.user_id = Some(Uuid::new_v4());
    (conn, rx)
}

// =============================================================================
// subscribe
// =============================================================================

#[tokio::test]
async fn subscribe_requires_identity() {
    let registry = ConnectionRegistry::new();
    let (tx, _rx) = mpsc::channel(8);
    let conn = Connection::new(tx);
    let board_id = Uuid::new_v4();

    assert_eq!(registry.subscribe(&conn, board_id).await, Err(RegistryError::Unauthenticated));
    assert_eq!(registry.subscriber_count(board_id).await, 0);
    assert_eq!(registry.board_count().await, 0);
    assert_eq!(RegistryError::Unauthenticated.error_code(), "E_NOT_AUTHENTICATED");
}

#[tokio::test]
async fn subscribe_creates_board_entry() {
    let registry = ConnectionRegistry::new();
    let (conn, _rx) = authed();
    let board_id = Uuid::new_v4();

    assert_eq!(registry.subscribe(&conn, board_id).await, Ok(None));
    assert_eq!(registry.board_of(conn.id).await, Some(board_id));
    assert_eq!(registry.subscriber_count(board_id).await, 1);
    assert_eq!(registry.board_count().await, 1);
}

#[tokio::test]
async fn subscribing_elsewhere_leaves_previous_board() {
    let registry = ConnectionRegistry::new();
    let (conn, _rx) = authed();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    registry.subscribe(&conn, first).await.expect("subscribe");
    assert_eq!(registry.subscribe(&conn, second).await, Ok(Some(first)));

    assert_eq!(registry.board_of(conn.id).await, Some(second));
    assert_eq!(registry.subscriber_count(first).await, 0);
    assert_eq!(registry.subscriber_count(second).await, 1);
    assert_eq!(registry.board_count().await, 1, "empty board entry should be removed");
}

#[tokio::test]
async fn resubscribing_same_board_keeps_single_membership() {
    let registry = ConnectionRegistry::new();
    let (conn, _rx) = authed();
    let board_id = Uuid::new_v4();

    registry.subscribe(&conn, board_id).await.expect("subscribe");
    registry.subscribe(&conn, board_id).await.expect("resubscribe");

    assert_eq!(registry.subscriber_count(board_id).await, 1);
    assert_eq!(registry.live_subscribers(board_id).await.len(), 1);
}

// =============================================================================
// unsubscribe / on_close
// =============================================================================

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let registry = ConnectionRegistry::new();
    let (conn, _rx) = authed();
    let board_id = Uuid::new_v4();

    registry.subscribe(&conn, board_id).await.expect("subscribe");
    assert_eq!(registry.unsubscribe(conn.id).await, Some(board_id));
    assert_eq!(registry.unsubscribe(conn.id).await, None);
    assert_eq!(registry.board_of(conn.id).await, None);
    assert_eq!(registry.board_count().await, 0);
}

#[tokio::test]
async fn unsubscribe_unknown_connection_is_noop() {
    let registry = ConnectionRegistry::new();
    assert_eq!(registry.unsubscribe(Uuid::new_v4()).await, None);
}

#[tokio::test]
async fn on_close_keeps_other_subscribers() {
    let registry = ConnectionRegistry::new();
    let (a, _rx_a) = authed();
    let (b, _rx_b) = authed();
    let board_id = Uuid::new_v4();

    registry.subscribe(&a, board_id).await.expect("subscribe a");
    registry.subscribe(&b, board_id).await.expect("subscribe b");
    assert_eq!(registry.on_close(a.id).await, Some(board_id));

    let live = registry.live_subscribers(board_id).await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].0, b.id);
    assert_eq!(Some(live[0].1), b.user_id);
}

#[tokio::test]
async fn live_subscribers_report_bound_identity() {
    let registry = ConnectionRegistry::new();
    let (conn, _rx) = authed();
    let board_id = Uuid::new_v4();
    registry.subscribe(&conn, board_id).await.expect("subscribe");

    let subscribers = registry.live_subscribers(board_id).await;
    let ids: Vec<(Uuid, Uuid)> = subscribers.iter().map(|(id, user, _)| (*id, *user)).collect();
    assert_eq!(ids, vec![(conn.id, conn.user_id.expect("authed"))]);
}

#[tokio::test]
async fn live_subscribers_of_unknown_board_is_empty() {
    let registry = ConnectionRegistry::new();
    assert!(registry.live_subscribers(Uuid::new_v4()).await.is_empty());
}

#[tokio::test]
async fn concurrent_subscribes_are_all_recorded() {
    let registry = Arc::new(ConnectionRegistry::new());
    let board_id = Uuid::new_v4();
    let mut receivers = Vec::new();
    let mut handles = Vec::new();

    for _ in 0..32 {
        let (conn, rx) = authed();
        receivers.push(rx);
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.subscribe(&conn, board_id).await }));
    }
    for handle in handles {
        handle.await.expect("join").expect("subscribe");
    }

    assert_eq!(registry.subscriber_count(board_id).await, 32);
}
