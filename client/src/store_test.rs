use super::*;
use frames::{CardMove, EntityRef, ListMove, MemberChange, Visibility};

struct Fixture {
    store: BoardStore,
    board_id: Uuid,
    l1: Uuid,
    l2: Uuid,
}

fn card(list_id: Uuid, position: i64, title: &str) -> Card {
    Card {
        id: Uuid::new_v4(),
        list_id,
        title: title.into(),
        description: None,
        position,
        due_date: None,
        created_by: None,
    }
}

fn list(board_id: Uuid, position: i64, name: &str, titles: &[&str]) -> List {
    let id = Uuid::new_v4();
    let cards = titles
        .iter()
        .enumerate()
        .map(|(i, t)| card(id, i64::try_from(i).expect("small index"), t))
        .collect();
    List { id, board_id, name: name.into(), position, cards }
}

/// Board with L1 = [a, b, c] and L2 = [x, y, z].
fn fixture() -> Fixture {
    let board_id = Uuid::new_v4();
    let mut snapshot = BoardSnapshot::new(Board {
        id: board_id,
        name: "Sprint".into(),
        slug: None,
        visibility: Visibility::Private,
        created_by: None,
        background: None,
    });
    let l1 = list(board_id, 0, "Todo", &["a", "b", "c"]);
    let l2 = list(board_id, 1, "Doing", &["x", "y", "z"]);
    let (l1_id, l2_id) = (l1.id, l2.id);
    snapshot.lists = vec![l1, l2];
    Fixture { store: BoardStore::new(snapshot), board_id, l1: l1_id, l2: l2_id }
}

fn titles(store: &BoardStore, list_id: Uuid) -> Vec<String> {
    store
        .snapshot()
        .list(list_id)
        .expect("list present")
        .cards
        .iter()
        .map(|c| c.title.clone())
        .collect()
}

fn positions(store: &BoardStore, list_id: Uuid) -> Vec<i64> {
    store.snapshot().list(list_id).expect("list present").cards.iter().map(|c| c.position).collect()
}

fn card_id(store: &BoardStore, list_id: Uuid, index: usize) -> Uuid {
    store.snapshot().list(list_id).expect("list present").cards[index].id
}

fn assert_dense(store: &BoardStore) {
    for (li, list) in store.snapshot().lists.iter().enumerate() {
        assert_eq!(list.position, i64::try_from(li).expect("small index"), "list positions dense");
        for (ci, card) in list.cards.iter().enumerate() {
            assert_eq!(card.position, i64::try_from(ci).expect("small index"), "card positions dense");
            assert_eq!(card.list_id, list.id, "card list_id matches its list");
        }
    }
}

fn event(board_id: Uuid, payload: EventPayload) -> DomainEvent {
    DomainEvent::new(board_id, Uuid::new_v4(), payload)
}

// =============================================================================
// LOAD
// =============================================================================

#[test]
fn new_store_normalizes_snapshot() {
    let board_id = Uuid::new_v4();
    let mut snapshot = BoardSnapshot::new(Board {
        id: board_id,
        name: "B".into(),
        slug: None,
        visibility: Visibility::Public,
        created_by: None,
        background: None,
    });
    let mut l = list(board_id, 7, "Only", &["a", "b"]);
    l.cards[0].position = 9;
    l.cards[1].position = 3;
    snapshot.lists = vec![l];

    let store = BoardStore::new(snapshot);
    let only = store.snapshot().lists[0].id;
    assert_eq!(titles(&store, only), ["b", "a"]);
    assert_dense(&store);
}

// =============================================================================
// LOCAL MUTATIONS + ROLLBACK
// =============================================================================

#[test]
fn move_card_across_lists_matches_reference_example() {
    let Fixture { mut store, l1, l2, .. } = fixture();
    let c = card_id(&store, l1, 2);

    store.move_card(c, l2, 1).expect("move");

    assert_eq!(titles(&store, l2), ["x", "c", "y", "z"]);
    assert_eq!(positions(&store, l2), [0, 1, 2, 3]);
    assert_eq!(titles(&store, l1), ["a", "b"]);
    assert_eq!(positions(&store, l1), [0, 1]);
    assert_eq!(store.snapshot().card(c).expect("card").list_id, l2);
}

#[test]
fn rollback_move_card_restores_both_lists() {
    let Fixture { mut store, l1, l2, .. } = fixture();
    let before = store.snapshot().clone();
    let a = card_id(&store, l1, 0);

    let token = store.move_card(a, l2, 3).expect("move");
    store.rollback(token).expect("rollback");

    assert_eq!(store.snapshot(), &before);
    assert!(store.pending().is_empty());
}

#[test]
fn rollback_move_within_list() {
    let Fixture { mut store, l1, .. } = fixture();
    let before = store.snapshot().clone();
    let a = card_id(&store, l1, 0);

    let token = store.move_card(a, l1, 2).expect("move");
    assert_eq!(titles(&store, l1), ["b", "c", "a"]);
    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn move_list_and_rollback() {
    let Fixture { mut store, l1, l2, .. } = fixture();
    let before = store.snapshot().clone();

    let token = store.move_list(l2, 0).expect("move");
    assert_eq!(store.snapshot().lists[0].id, l2);
    assert_dense(&store);

    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot().lists[0].id, l1);
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn rename_board_and_rollback() {
    let Fixture { mut store, .. } = fixture();
    let token = store.rename_board("Renamed");
    assert_eq!(store.snapshot().board.name, "Renamed");
    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot().board.name, "Sprint");
}

#[test]
fn rename_list_and_rollback() {
    let Fixture { mut store, l1, .. } = fixture();
    let token = store.rename_list(l1, "Backlog").expect("rename");
    assert_eq!(store.snapshot().list(l1).expect("list").name, "Backlog");
    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot().list(l1).expect("list").name, "Todo");
}

#[test]
fn update_card_keeps_placement_and_rolls_back() {
    let Fixture { mut store, l1, l2, .. } = fixture();
    let before = store.snapshot().clone();
    let b = card_id(&store, l1, 1);
    let mut edited = store.snapshot().card(b).expect("card").clone();
    edited.title = "b2".into();
    edited.description = Some("details".into());
    edited.list_id = l2;
    edited.position = 0;

    let token = store.update_card(&edited).expect("update");
    let stored = store.snapshot().card(b).expect("card");
    assert_eq!(stored.title, "b2");
    assert_eq!(stored.description.as_deref(), Some("details"));
    assert_eq!(stored.list_id, l1);
    assert_eq!(stored.position, 1);

    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn add_card_inserts_at_rank_and_rolls_back() {
    let Fixture { mut store, l1, .. } = fixture();
    let before = store.snapshot().clone();
    let new_card = card(l1, 1, "new");

    let token = store.add_card(new_card.clone()).expect("add");
    assert_eq!(titles(&store, l1), ["a", "new", "b", "c"]);
    assert_dense(&store);
    assert_eq!(store.add_card(new_card), Err(StoreError::Duplicate(card_id(&store, l1, 1))));

    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn add_card_to_unknown_list_fails_without_change() {
    let Fixture { mut store, .. } = fixture();
    let before = store.snapshot().clone();
    let missing = Uuid::new_v4();
    assert_eq!(store.add_card(card(missing, 0, "lost")), Err(StoreError::ListNotFound(missing)));
    assert_eq!(store.snapshot(), &before);
    assert!(store.pending().is_empty());
}

#[test]
fn add_list_appends_and_rolls_back() {
    let Fixture { mut store, board_id, .. } = fixture();
    let before = store.snapshot().clone();
    let done = list(board_id, i64::MAX, "Done", &[]);
    let done_id = done.id;

    let token = store.add_list(done).expect("add");
    assert_eq!(store.snapshot().lists[2].id, done_id);
    assert_dense(&store);

    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn delete_card_renumbers_and_rolls_back() {
    let Fixture { mut store, l1, .. } = fixture();
    let before = store.snapshot().clone();
    let b = card_id(&store, l1, 1);

    let token = store.delete_card(b).expect("delete");
    assert_eq!(titles(&store, l1), ["a", "c"]);
    assert_eq!(positions(&store, l1), [0, 1]);

    store.rollback(token).expect("rollback");
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn confirm_discards_pending_entry() {
    let Fixture { mut store, l1, l2, .. } = fixture();
    let token = store.move_card(card_id(&store, l1, 0), l2, 0).expect("move");
    assert!(store.confirm(token));
    assert!(!store.confirm(token));
    assert_eq!(store.rollback(token), Err(StoreError::UnknownToken(token)));
    assert_eq!(titles(&store, l2), ["a", "x", "y", "z"]);
}

#[test]
fn rollback_after_target_vanished_marks_stale() {
    let Fixture { mut store, board_id, l1, .. } = fixture();
    let a = card_id(&store, l1, 0);
    let token = store.rename_list(l1, "Renamed").expect("rename");
    let edited = Card { title: "a2".into(), ..store.snapshot().card(a).expect("card").clone() };
    let edit = store.update_card(&edited).expect("update");

    store.apply_event(&event(board_id, EventPayload::CardDeleted(EntityRef { id: a })));
    assert_eq!(store.rollback(edit), Err(StoreError::CardNotFound(a)));
    assert!(store.is_stale());
    store.rollback(token).expect("list still present");
}

// =============================================================================
// INBOUND EVENTS
// =============================================================================

#[test]
fn card_moved_event_uses_same_allocator() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();
    let c = card_id(&store, l1, 2);

    let applied = store.apply_event(&event(
        board_id,
        EventPayload::CardMoved(CardMove { card_id: c, from_list_id: l1, to_list_id: l2, position: 1 }),
    ));

    assert_eq!(applied, Applied::Changed);
    assert_eq!(titles(&store, l2), ["x", "c", "y", "z"]);
    assert_eq!(titles(&store, l1), ["a", "b"]);
    assert_dense(&store);
}

#[test]
fn card_moved_for_unknown_card_is_ignored_and_marks_stale() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();
    let before = store.snapshot().clone();

    let applied = store.apply_event(&event(
        board_id,
        EventPayload::CardMoved(CardMove { card_id: Uuid::new_v4(), from_list_id: l1, to_list_id: l2, position: 0 }),
    ));

    assert_eq!(applied, Applied::UnknownTarget);
    assert_eq!(store.snapshot(), &before);
    assert!(store.is_stale());
}

#[test]
fn card_moved_to_unknown_list_is_ignored() {
    let Fixture { mut store, board_id, l1, .. } = fixture();
    let before = store.snapshot().clone();
    let a = card_id(&store, l1, 0);

    let applied = store.apply_event(&event(
        board_id,
        EventPayload::CardMoved(CardMove { card_id: a, from_list_id: l1, to_list_id: Uuid::new_v4(), position: 0 }),
    ));
    assert_eq!(applied, Applied::UnknownTarget);
    assert_eq!(store.snapshot(), &before);
}

#[test]
fn event_for_other_board_is_ignored() {
    let Fixture { mut store, l1, .. } = fixture();
    let before = store.snapshot().clone();
    let applied = store.apply_event(&event(Uuid::new_v4(), EventPayload::CardDeleted(EntityRef { id: card_id(&store, l1, 0) })));
    assert_eq!(applied, Applied::OtherBoard);
    assert_eq!(store.snapshot(), &before);
    assert!(!store.is_stale());
}

#[test]
fn created_echo_of_optimistic_add_does_not_duplicate() {
    let Fixture { mut store, board_id, l1, .. } = fixture();
    let new_card = card(l1, 3, "new");
    store.add_card(new_card.clone()).expect("add");

    let mut echo = new_card;
    echo.title = "new (saved)".into();
    assert_eq!(store.apply_event(&event(board_id, EventPayload::CardCreated(echo))), Applied::Changed);

    assert_eq!(titles(&store, l1), ["a", "b", "c", "new (saved)"]);
}

#[test]
fn card_created_from_peer_is_inserted() {
    let Fixture { mut store, board_id, l2, .. } = fixture();
    store.apply_event(&event(board_id, EventPayload::CardCreated(card(l2, 3, "peer"))));
    assert_eq!(titles(&store, l2), ["x", "y", "z", "peer"]);
    assert_dense(&store);
}

#[test]
fn card_updated_event_keeps_placement() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();
    let mut updated = store.snapshot().lists[0].cards[0].clone();
    updated.title = "renamed".into();
    updated.list_id = l2;
    updated.position = 2;

    store.apply_event(&event(board_id, EventPayload::CardUpdated(updated)));
    assert_eq!(titles(&store, l1), ["renamed", "b", "c"]);
    assert_eq!(titles(&store, l2), ["x", "y", "z"]);
}

#[test]
fn card_deleted_event_renumbers_and_echo_is_unchanged() {
    let Fixture { mut store, board_id, l1, .. } = fixture();
    let a = card_id(&store, l1, 0);
    store.delete_card(a).expect("local delete");

    let applied = store.apply_event(&event(board_id, EventPayload::CardDeleted(EntityRef { id: a })));
    assert_eq!(applied, Applied::Unchanged);
    assert!(!store.is_stale());

    let b = card_id(&store, l1, 0);
    store.apply_event(&event(board_id, EventPayload::CardDeleted(EntityRef { id: b })));
    assert_eq!(titles(&store, l1), ["c"]);
    assert_eq!(positions(&store, l1), [0]);
}

#[test]
fn list_events_create_rename_and_move() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();
    let mut done = list(board_id, 0, "Done", &["q"]);
    done.cards[0].list_id = Uuid::new_v4();
    let done_id = done.id;

    store.apply_event(&event(board_id, EventPayload::ListCreated(done.clone())));
    assert_eq!(store.snapshot().lists[0].id, done_id);
    assert_dense(&store);

    store.apply_event(&event(board_id, EventPayload::ListCreated(done)));
    assert_eq!(store.snapshot().lists.len(), 3, "list.created echo is an upsert");

    let mut renamed = store.snapshot().list(l1).expect("list").clone();
    renamed.name = "Backlog".into();
    store.apply_event(&event(board_id, EventPayload::ListUpdated(renamed)));
    assert_eq!(store.snapshot().list(l1).expect("list").name, "Backlog");

    store.apply_event(&event(board_id, EventPayload::ListMoved(ListMove { list_id: l2, position: 0 })));
    let order: Vec<Uuid> = store.snapshot().lists.iter().map(|l| l.id).collect();
    assert_eq!(order, [l2, done_id, l1]);
    assert_dense(&store);
}

#[test]
fn list_created_for_existing_list_refreshes_name_only() {
    let Fixture { mut store, board_id, l1, .. } = fixture();
    let mut echo = store.snapshot().list(l1).expect("list").clone();
    echo.name = "Inbox".into();
    echo.position = 1;
    echo.cards.clear();

    assert_eq!(store.apply_event(&event(board_id, EventPayload::ListCreated(echo))), Applied::Changed);
    let list = store.snapshot().list(l1).expect("list");
    assert_eq!(list.name, "Inbox");
    assert_eq!(list.position, 0);
    assert_eq!(titles(&store, l1), ["a", "b", "c"]);
}

#[test]
fn list_updated_keeps_placement() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();
    let mut renamed = store.snapshot().list(l1).expect("list").clone();
    renamed.name = "Later".into();
    renamed.position = 1;

    store.apply_event(&event(board_id, EventPayload::ListUpdated(renamed)));
    let order: Vec<Uuid> = store.snapshot().lists.iter().map(|l| l.id).collect();
    assert_eq!(order, [l1, l2]);
    assert_eq!(store.snapshot().list(l1).expect("list").name, "Later");
}

#[test]
fn mark_stale_sets_flag_until_resync() {
    let Fixture { mut store, .. } = fixture();
    store.mark_stale();
    assert!(store.is_stale());
    let snapshot = store.snapshot().clone();
    store.replace_snapshot(snapshot);
    assert!(!store.is_stale());
}

#[test]
fn list_moved_for_unknown_list_marks_stale() {
    let Fixture { mut store, board_id, .. } = fixture();
    let applied =
        store.apply_event(&event(board_id, EventPayload::ListMoved(ListMove { list_id: Uuid::new_v4(), position: 0 })));
    assert_eq!(applied, Applied::UnknownTarget);
    assert!(store.is_stale());
}

#[test]
fn board_update_replaces_board_fields_only() {
    let Fixture { mut store, board_id, .. } = fixture();
    let mut board = store.snapshot().board.clone();
    board.name = "Q3".into();
    board.visibility = Visibility::Team;

    assert_eq!(store.apply_event(&event(board_id, EventPayload::BoardUpdated(board))), Applied::Changed);
    assert_eq!(store.snapshot().board.name, "Q3");
    assert_eq!(store.snapshot().lists.len(), 2);
}

#[test]
fn member_events_maintain_roster() {
    let Fixture { mut store, board_id, .. } = fixture();
    let user_id = Uuid::new_v4();

    store.apply_event(&event(board_id, EventPayload::MemberJoined(MemberChange { user_id, role: None })));
    assert_eq!(store.snapshot().members, vec![Member { user_id, role: Role::Viewer }]);

    store.apply_event(&event(board_id, EventPayload::MemberJoined(MemberChange { user_id, role: Some(Role::Admin) })));
    assert_eq!(store.snapshot().members, vec![Member { user_id, role: Role::Admin }]);

    store.apply_event(&event(board_id, EventPayload::MemberLeft(MemberChange { user_id, role: None })));
    assert!(store.snapshot().members.is_empty());
}

#[test]
fn replace_snapshot_clears_pending_and_stale() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();
    store.move_card(card_id(&store, l1, 0), l2, 0).expect("move");
    store.apply_event(&event(board_id, EventPayload::CardUpdated(card(l1, 0, "ghost"))));
    assert!(store.is_stale());

    let fresh = fixture().store.snapshot().clone();
    store.replace_snapshot(fresh.clone());
    assert!(!store.is_stale());
    assert!(store.pending().is_empty());
    assert_eq!(store.snapshot(), &fresh);
}

#[test]
fn mixed_local_and_remote_sequence_stays_dense() {
    let Fixture { mut store, board_id, l1, l2 } = fixture();

    for step in 0..30_i64 {
        let source = if step % 2 == 0 { l1 } else { l2 };
        let target = if step % 3 == 0 { l1 } else { l2 };
        let Some(first) = store.snapshot().list(source).and_then(|l| l.cards.first()).map(|c| c.id) else {
            continue;
        };
        if step % 4 == 0 {
            store.apply_event(&event(
                board_id,
                EventPayload::CardMoved(CardMove { card_id: first, from_list_id: source, to_list_id: target, position: step % 5 }),
            ));
        } else {
            store.move_card(first, target, step % 5).expect("move");
        }
        if step % 7 == 0 {
            store.move_list(l1, step % 2).expect("move list");
        }
        assert_dense(&store);
    }

    let total: usize = store.snapshot().lists.iter().map(|l| l.cards.len()).sum();
    assert_eq!(total, 6);
}
