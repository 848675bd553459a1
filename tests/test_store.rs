use mailbase_lib::{
    store::{Error, LoadProgress, MemoryBodyStore, StoreEvent},
    EngineConfig, Headers, MessageFlags, MessageRecord, SortBy, Store,
};
use std::cmp::Ordering;
use tempfile::tempdir;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn open(dir: &std::path::Path) -> Store {
    let config = EngineConfig::with_root_dir(dir);
    let mut store = Store::open(&config, dir, Box::new(MemoryBodyStore::new())).unwrap();
    while store.load_step().unwrap() != LoadProgress::Done {}
    store
}

fn record(message_id: &str, subject: &str) -> MessageRecord {
    MessageRecord {
        from: "alice@localhost".into(),
        to: "bob@localhost".into(),
        subject: subject.into(),
        message_id: message_id.into(),
        sent_time: 1_600_000_000,
        ..MessageRecord::default()
    }
}

fn reply(message_id: &str, subject: &str, parent: &str) -> MessageRecord {
    MessageRecord {
        headers: Headers {
            references: format!("<{}>", parent),
            ..Headers::default()
        },
        ..record(message_id, subject)
    }
}

#[test]
fn test_store_unavailable_while_loading() {
    init_logger();
    let dir = tempdir().unwrap();
    let config = EngineConfig::with_root_dir(dir.path());
    let mut store = Store::open(&config, dir.path(), Box::new(MemoryBodyStore::new())).unwrap();

    // checking that no id can be allocated before the load ends
    assert!(matches!(
        store.add_message(record("a@localhost", "Hello")),
        Err(Error::StoreUnavailableError)
    ));

    assert_eq!(LoadProgress::Done, store.load_step().unwrap());
    assert_eq!(
        vec![StoreEvent::AllMessagesAvailable],
        store.drain_events()
    );
    assert_eq!(1, store.add_message(record("a@localhost", "Hello")).unwrap());
}

#[test]
fn test_store_duplicates() {
    init_logger();
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());

    // adding three copies of the same message
    let a = store.add_message(record("<same@localhost>", "Hello")).unwrap();
    let b = store.add_message(record("same@localhost", "Hello")).unwrap();
    let c = store.add_message(record(" <same@localhost> ", "Hello")).unwrap();

    // checking that the first one is the master
    assert_eq!(a, store.find_duplicate_master(a));
    assert_eq!(a, store.find_duplicate_master(b));
    assert_eq!(a, store.find_duplicate_master(c));
    assert_eq!(vec![a, b, c], store.duplicates(c));
    assert_eq!(Some(a), store.find_by_message_id("same@localhost").unwrap());

    // removing the master elects the next member
    store.remove_message(a).unwrap();
    assert!(store.is_removal_pending(a));
    store.flush().unwrap();
    assert!(!store.contains(a));
    assert_eq!(b, store.find_duplicate_master(b));
    assert_eq!(b, store.find_duplicate_master(c));
    assert_eq!(Some(b), store.find_by_message_id("<same@localhost>").unwrap());

    // removing the new master leaves a message without duplicates
    store.remove_message(b).unwrap();
    store.flush().unwrap();
    assert_eq!(c, store.find_duplicate_master(c));
    assert_eq!(vec![c], store.duplicates(c));
}

#[test]
fn test_store_threads() {
    init_logger();
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());

    let root = store.add_message(record("root@localhost", "Hello")).unwrap();
    let answer = store
        .add_message(reply("answer@localhost", "Re: Hello", "root@localhost"))
        .unwrap();
    let other = store
        .add_message(reply("other@localhost", "Completely different", "root@localhost"))
        .unwrap();

    // checking that a reply with the same subject is threaded
    assert_eq!(root, store.parent_id(answer));
    assert_eq!(root, store.thread_root(answer));
    assert_eq!(vec![answer], store.children_ids(root).to_vec());
    assert_eq!(vec![root, answer], store.thread_ids(answer).to_vec());

    // checking that a reply with another subject starts a new thread
    assert_eq!(0, store.parent_id(other));
    assert_eq!(other, store.thread_root(other));

    // checking that the subject check can be turned off
    store.set_split_thread_on_subject_change(false);
    let forced = store
        .add_message(reply("forced@localhost", "Something else", "root@localhost"))
        .unwrap();
    assert_eq!(root, store.parent_id(forced));
}

#[test]
fn test_store_flags_and_reload() {
    init_logger();
    let dir = tempdir().unwrap();

    let (id, removed) = {
        let mut store = open(dir.path());
        let id = store.add_message(record("a@localhost", "Hello")).unwrap();
        let removed = store.add_message(record("b@localhost", "Bye")).unwrap();
        store.drain_events();

        // checking that unchanged flags do not emit anything
        assert!(!store.set_flags(id, MessageFlags::empty()).unwrap());
        assert!(store.drain_events().is_empty());

        assert!(store.set_flag(id, MessageFlags::IS_READ, true).unwrap());
        assert_eq!(vec![StoreEvent::MessageChanged(id)], store.drain_events());

        store.remove_message(removed).unwrap();
        store.flush().unwrap();
        assert_eq!(vec![StoreEvent::MessageRemoved(removed)], store.drain_events());
        (id, removed)
    };

    // checking that a new store finds the records back
    let mut store = open(dir.path());
    let events = store.drain_events();
    assert!(events.contains(&StoreEvent::MessageAvailable { id, read: true }));
    assert_eq!(Some(&StoreEvent::AllMessagesAvailable), events.last());
    assert!(!store.contains(removed));
    assert_eq!("Hello", store.get_record(id).unwrap().subject);

    // checking that ids are never reused
    let next = store.add_message(record("c@localhost", "Again")).unwrap();
    assert!(next > removed);
}

#[test]
fn test_store_sort() {
    init_logger();
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());

    let small = store
        .add_message(MessageRecord {
            size: 10,
            sent_time: 2,
            ..record("small@localhost", "Zebra")
        })
        .unwrap();
    let big = store
        .add_message(MessageRecord {
            size: 1000,
            sent_time: 1,
            ..record("big@localhost", "Re: apple")
        })
        .unwrap();

    assert_eq!(Ordering::Less, store.compare_messages(small, big, SortBy::Size));
    assert_eq!(Ordering::Greater, store.compare_messages(small, big, SortBy::SentDate));
    assert_eq!(Ordering::Greater, store.compare_messages(small, big, SortBy::Subject));
    assert_eq!(Ordering::Less, store.compare_messages(small, big, SortBy::Id));
}
