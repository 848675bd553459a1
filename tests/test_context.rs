use mailbase_lib::{
    indexer::Notification,
    scheduler::TaskKey,
    store::MemoryBodyStore,
    view::{Search, SearchField, SearchOption, PIN_BOARD, RECEIVED, SPAM, TRASH, UNREAD},
    Context, EngineConfig, MessageFlags, MessageRecord,
};
use std::{
    path::Path,
    time::{Duration, Instant},
};
use tempfile::tempdir;

fn config(dir: &Path) -> EngineConfig {
    EngineConfig {
        lock: false,
        ..EngineConfig::with_root_dir(dir)
    }
}

fn open(dir: &Path) -> Context {
    let mut ctx = Context::open_with_bodies(config(dir), Box::new(MemoryBodyStore::new())).unwrap();
    ctx.run_until_idle().unwrap();
    assert!(ctx.is_loaded());
    ctx
}

/// Runs every task, including the delayed ones.
fn run_all(ctx: &mut Context) {
    let later = Instant::now() + Duration::from_secs(3600);
    while ctx.run_turn_at(later).unwrap().is_some() {}
}

fn record(from: &str, subject: &str) -> MessageRecord {
    MessageRecord {
        from: from.into(),
        to: "me@localhost".into(),
        subject: subject.into(),
        message_id: format!("{}@localhost", subject.to_lowercase().replace(' ', ".")),
        ..MessageRecord::default()
    }
}

#[test]
fn test_context() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();

    let (hello, invoice) = {
        let mut ctx = open(dir.path());

        let hello = ctx
            .add_message(
                record("alice@localhost", "Hello there"),
                Some(b"Subject: Hello there\r\n\r\nSee you at the harbour\r\n"),
            )
            .unwrap();
        let invoice = ctx
            .add_message(record("billing@localhost", "Invoice 42"), None)
            .unwrap();

        // checking that new messages are routed
        let notifications = ctx.drain_notifications();
        assert!(notifications.contains(&Notification::MessageAdded {
            view: RECEIVED,
            id: hello
        }));
        assert!(notifications.contains(&Notification::MessageAdded {
            view: UNREAD,
            id: invoice
        }));
        assert!(ctx.scheduler().is_pending(TaskKey::StoreCommit));
        assert!(ctx.scheduler().is_pending(TaskKey::LexiconCommit));

        // checking that words are searchable once committed
        assert!(ctx.find_words("harbour", false).unwrap().is_empty());
        run_all(&mut ctx);
        assert!(!ctx.scheduler().is_pending(TaskKey::LexiconCommit));
        assert_eq!(vec![hello], ctx.find_words("harbour", false).unwrap().to_vec());
        assert_eq!(vec![invoice], ctx.find_words("invoice", false).unwrap().to_vec());
        assert_eq!(vec![hello], ctx.find_words("harb", true).unwrap().to_vec());

        // checking that reading a message leaves the unread view
        assert!(ctx.mark_read(hello, true).unwrap());
        assert!(!ctx.mark_read(hello, true).unwrap());
        let (indexer, _) = ctx.indexer_mut();
        assert!(!indexer.get_view(UNREAD).unwrap().contains(hello));
        assert!(indexer.get_view(UNREAD).unwrap().contains(invoice));

        // checking that a search runs one message per turn
        let search = ctx
            .start_search(
                vec![Search::new("billing", SearchField::From, SearchOption::Exact)],
                0,
            )
            .unwrap();
        assert!(ctx.scheduler().is_pending(TaskKey::ContinueSearch));
        run_all(&mut ctx);
        assert!(ctx
            .drain_notifications()
            .contains(&Notification::SearchStabilized(search)));
        assert_eq!(vec![invoice], ctx.indexer().view(search).unwrap().members().to_vec());

        ctx.close().unwrap();
        (hello, invoice)
    };

    // checking that everything is found back after a restart
    let mut ctx = open(dir.path());
    assert!(ctx.store().contains(hello));
    assert!(ctx
        .store()
        .get_flags(hello)
        .unwrap()
        .contains(MessageFlags::IS_READ));
    assert_eq!(vec![hello], ctx.find_words("harbour", false).unwrap().to_vec());

    let (indexer, _) = ctx.indexer_mut();
    assert_eq!(vec![hello, invoice], indexer.get_view(RECEIVED).unwrap().members().to_vec());
    assert_eq!(vec![invoice], indexer.get_view(UNREAD).unwrap().members().to_vec());
}

#[test]
fn test_context_async_words() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let mut ctx = open(dir.path());

    let id = ctx
        .add_message(record("alice@localhost", "Garden party"), None)
        .unwrap();
    ctx.lexicon().commit().unwrap();

    let search = ctx.async_find_words("garden", false).unwrap();

    // polling until the worker answers
    let mut results = vec![];
    for _ in 0..500 {
        run_all(&mut ctx);
        results.extend(ctx.take_word_results());
        if !results.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(1, results.len());
    let (found_search, found) = results.remove(0);
    assert_eq!(search, found_search);
    assert_eq!(vec![id], found.unwrap().to_vec());
}

#[test]
fn test_context_remove_and_reset() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();

    {
        let mut ctx = open(dir.path());
        let kept = ctx
            .add_message(record("alice@localhost", "Kept"), None)
            .unwrap();
        let removed = ctx
            .add_message(record("alice@localhost", "Removed"), None)
            .unwrap();

        ctx.remove_message(removed).unwrap();
        let (indexer, _) = ctx.indexer_mut();
        assert!(!indexer.get_view(RECEIVED).unwrap().contains(removed));

        ctx.commit().unwrap();
        assert!(ctx.store().contains(kept));
        assert!(!ctx.store().contains(removed));
        ctx.close().unwrap();
    }

    // checking that a reset engine starts empty
    Context::reset(&config(dir.path())).unwrap();
    let mut ctx = open(dir.path());
    assert_eq!(0, ctx.store().len());
    let (indexer, _) = ctx.indexer_mut();
    assert!(indexer.get_view(RECEIVED).unwrap().is_empty());
}

#[test]
fn test_context_flags_follow_views() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let mut ctx = open(dir.path());

    let id = ctx
        .add_message(record("alice@localhost", "Flag me"), None)
        .unwrap();
    let flags = ctx.store().get_flags(id).unwrap();
    let marked = flags | MessageFlags::IS_FLAGGED | MessageFlags::IS_SPAM | MessageFlags::IS_DELETED;

    // checking that setting flags moves the message in
    assert!(ctx.set_flags(id, marked).unwrap());
    let (indexer, _) = ctx.indexer_mut();
    assert!(indexer.get_view(PIN_BOARD).unwrap().contains(id));
    assert!(indexer.get_view(SPAM).unwrap().contains(id));
    assert!(indexer.get_view(TRASH).unwrap().contains(id));
    assert!(ctx
        .drain_notifications()
        .contains(&Notification::MessageAdded { view: PIN_BOARD, id }));

    // checking that clearing them moves the message out
    assert!(ctx.set_flags(id, marked - MessageFlags::IS_SPAM).unwrap());
    let (indexer, _) = ctx.indexer_mut();
    assert!(indexer.get_view(PIN_BOARD).unwrap().contains(id));
    assert!(!indexer.get_view(SPAM).unwrap().contains(id));
    assert!(indexer.get_view(TRASH).unwrap().contains(id));

    assert!(ctx.set_flags(id, flags).unwrap());
    let (indexer, _) = ctx.indexer_mut();
    assert!(!indexer.get_view(PIN_BOARD).unwrap().contains(id));
    assert!(!indexer.get_view(TRASH).unwrap().contains(id));
    assert!(!ctx.set_flags(id, flags).unwrap());
}
