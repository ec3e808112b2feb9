use super::*;

#[test]
fn tokens_are_unique() {
    assert_ne!(OpToken::new(), OpToken::new());
}

#[test]
fn token_serializes_as_bare_uuid() {
    let token = OpToken::new();
    let json = serde_json::to_value(token).expect("serialize");
    assert_eq!(json, serde_json::json!(token.as_uuid()));
    assert_eq!(token.to_string(), token.as_uuid().to_string());
}

#[test]
fn push_then_take_returns_inverse_once() {
    let mut log = PendingLog::new();
    let token = log.push(Inverse::RenameBoard { name: "Old".into() });
    assert!(log.contains(token));
    assert_eq!(log.len(), 1);

    let op = log.take(token).expect("pending entry");
    assert_eq!(op.inverse, Inverse::RenameBoard { name: "Old".into() });
    assert!(log.take(token).is_none());
    assert!(log.is_empty());
}

#[test]
fn take_preserves_order_of_the_rest() {
    let mut log = PendingLog::new();
    let first = log.push(Inverse::RemoveCard { card_id: Uuid::new_v4() });
    let second = log.push(Inverse::RemoveList { list_id: Uuid::new_v4() });
    let third = log.push(Inverse::RenameBoard { name: "x".into() });

    log.take(second);
    assert_eq!(log.older_than(Duration::ZERO), vec![first, third]);
}

#[test]
fn older_than_filters_fresh_entries() {
    let mut log = PendingLog::new();
    log.push(Inverse::RenameBoard { name: "x".into() });
    assert!(log.older_than(Duration::from_secs(3600)).is_empty());
}

#[test]
fn clear_empties_log() {
    let mut log = PendingLog::new();
    log.push(Inverse::RenameBoard { name: "x".into() });
    log.clear();
    assert!(log.is_empty());
}
