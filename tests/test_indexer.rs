use mailbase_lib::{
    indexer::{Error, Indexer, Notification, Verdict},
    store::{LoadProgress, MemoryBodyStore},
    view::{
        ModelFlags, Search, SearchField, SearchOption, ViewKind, DRAFTS, FOLDERS, RECEIVED,
        SEARCH_RANGE, SENT, SPAM, TRASH, UNREAD,
    },
    EngineConfig, Headers, MessageFlags, MessageId, MessageRecord, Store,
};
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    store: Store,
    indexer: Indexer,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir().unwrap();
    let config = EngineConfig::with_root_dir(dir.path());
    let mut store = Store::open(&config, dir.path(), Box::new(MemoryBodyStore::new())).unwrap();
    while store.load_step().unwrap() != LoadProgress::Done {}
    let indexer = Indexer::open(&config, dir.path()).unwrap();

    Fixture {
        _dir: dir,
        store,
        indexer,
    }
}

impl Fixture {
    fn add(&mut self, record: MessageRecord) -> MessageId {
        let id = self.store.add_message(record).unwrap();
        self.indexer.new_message(&mut self.store, id).unwrap();
        id
    }
}

fn message(from: &str, subject: &str) -> MessageRecord {
    MessageRecord {
        from: from.into(),
        to: "me@localhost".into(),
        subject: subject.into(),
        message_id: format!("{}.{}", subject.replace(' ', "-"), from),
        ..MessageRecord::default()
    }
}

#[test]
fn test_indexer_routing() {
    let mut fx = fixture();

    let received = fx.add(message("alice@localhost", "Hello"));
    let sent = fx.add(MessageRecord {
        flags: MessageFlags::IS_OUTGOING | MessageFlags::IS_SENT | MessageFlags::IS_READ,
        ..message("me@localhost", "Sent one")
    });
    let draft = fx.add(MessageRecord {
        flags: MessageFlags::IS_OUTGOING | MessageFlags::IS_READ,
        ..message("me@localhost", "Draft one")
    });
    let listed = fx.add(MessageRecord {
        headers: Headers {
            list_id: "<rust.lists.example.com>".into(),
            ..Headers::default()
        },
        ..message("bob@localhost", "Weekly digest")
    });

    let view = |fx: &mut Fixture, id| fx.indexer.get_view(id).unwrap().members().to_vec();
    assert_eq!(vec![received, listed], view(&mut fx, RECEIVED));
    assert_eq!(vec![received, listed], view(&mut fx, UNREAD));
    assert_eq!(vec![sent], view(&mut fx, SENT));
    assert_eq!(vec![draft], view(&mut fx, DRAFTS));

    // checking that the mailing list got its own view
    let lists = fx.indexer.children(mailbase_lib::view::MAILING_LISTS);
    assert_eq!(1, lists.len());
    assert_eq!(vec![listed], view(&mut fx, lists[0]));

    // checking that sending a draft moves it
    fx.store.message_sent(draft).unwrap();
    fx.indexer.message_sent(draft).unwrap();
    assert!(view(&mut fx, DRAFTS).is_empty());
    assert_eq!(vec![sent, draft], view(&mut fx, SENT));

    // checking that removing a message empties every view
    fx.indexer.remove_message(received, None).unwrap();
    assert!(!view(&mut fx, RECEIVED).contains(&received));
    assert!(!view(&mut fx, UNREAD).contains(&received));
}

#[test]
fn test_indexer_visibility() {
    let mut fx = fixture();

    let kept = fx.add(message("alice@localhost", "Kept"));
    let trashed = fx.add(MessageRecord {
        flags: MessageFlags::IS_DELETED,
        ..message("alice@localhost", "Trashed")
    });
    let sent = fx.add(MessageRecord {
        flags: MessageFlags::IS_OUTGOING | MessageFlags::IS_SENT,
        ..message("me@localhost", "Sent")
    });

    let folder = fx.indexer.add_folder_view("Work", FOLDERS).unwrap();
    for id in [kept, trashed, sent] {
        fx.indexer.add_message(&fx.store, folder, id).unwrap();
    }

    // checking that visibility does not change between two calls
    for id in [kept, trashed, sent] {
        let first = fx.indexer.is_visible(&fx.store, folder, id).unwrap();
        let second = fx.indexer.is_visible(&fx.store, folder, id).unwrap();
        assert_eq!(first, second);
    }

    assert!(fx.indexer.is_visible(&fx.store, folder, kept).unwrap());
    assert!(!fx.indexer.is_visible(&fx.store, folder, trashed).unwrap());
    assert!(fx.indexer.is_visible(&fx.store, TRASH, trashed).unwrap());
    assert!(fx.indexer.is_visible(&fx.store, folder, sent).unwrap());

    // checking that the model decides what is shown
    fx.indexer
        .update_view(&fx.store, folder, |view| {
            view.model.flags.insert(ModelFlags::SHOW_TRASH);
            view.model.flags.remove(ModelFlags::SHOW_SENT);
        })
        .unwrap();
    assert!(fx.indexer.is_visible(&fx.store, folder, trashed).unwrap());
    assert!(!fx.indexer.is_visible(&fx.store, folder, sent).unwrap());
    assert!(fx.indexer.is_visible(&fx.store, SENT, sent).unwrap());

    // checking the active account filter
    fx.indexer.set_active_account(Some(42));
    assert!(!fx.indexer.is_visible(&fx.store, folder, kept).unwrap());
    fx.indexer.set_active_account(None);
    assert!(fx.indexer.is_visible(&fx.store, folder, kept).unwrap());
}

#[test]
fn test_indexer_threaded_outgoing_visibility() {
    let mut fx = fixture();

    let question = fx.add(MessageRecord {
        message_id: "question@localhost".into(),
        ..message("alice@localhost", "Question")
    });
    let answer = fx.add(MessageRecord {
        flags: MessageFlags::IS_OUTGOING | MessageFlags::IS_SENT,
        message_id: "answer@localhost".into(),
        headers: Headers {
            references: "<question@localhost>".into(),
            ..Headers::default()
        },
        ..message("me@localhost", "Re: Question")
    });
    let lonely = fx.add(MessageRecord {
        flags: MessageFlags::IS_OUTGOING | MessageFlags::IS_SENT,
        ..message("me@localhost", "Lonely")
    });
    assert_eq!(question, fx.store.parent_id(answer));

    let folder = fx.indexer.add_folder_view("Threads", FOLDERS).unwrap();
    for id in [question, answer, lonely] {
        fx.indexer.add_message(&fx.store, folder, id).unwrap();
    }
    fx.indexer
        .update_view(&fx.store, folder, |view| {
            view.model.flags.remove(ModelFlags::SHOW_SENT);
            view.model.kind = mailbase_lib::view::ModelType::Threaded;
        })
        .unwrap();

    // an answer is shown next to its visible parent
    assert!(fx.indexer.is_visible(&fx.store, folder, answer).unwrap());
    assert!(!fx.indexer.is_visible(&fx.store, folder, lonely).unwrap());
}

#[test]
fn test_indexer_unread_count() {
    let mut fx = fixture();

    // checking that an empty view has no unread message
    let folder = fx.indexer.add_folder_view("Work", FOLDERS).unwrap();
    assert_eq!(0, fx.indexer.unread_count(&fx.store, folder).unwrap());

    // checking that a view of unread messages counts them all
    let ids: Vec<MessageId> = (0..5)
        .map(|n| fx.add(message("alice@localhost", &format!("Unread {}", n))))
        .collect();
    for id in &ids {
        fx.indexer.add_message(&fx.store, folder, *id).unwrap();
    }
    assert_eq!(5, fx.indexer.unread_count(&fx.store, folder).unwrap());
    let members = fx.indexer.get_view(folder).unwrap().len() as u32;
    assert_eq!(members, fx.indexer.unread_count(&fx.store, folder).unwrap());

    // checking that reading a message updates the count
    fx.store.set_flag(ids[0], MessageFlags::IS_READ, true).unwrap();
    fx.indexer.message_read(ids[0], true).unwrap();
    assert_eq!(4, fx.indexer.unread_count(&fx.store, folder).unwrap());

    // checking that hidden messages are not counted
    fx.indexer.add_message(&fx.store, TRASH, ids[1]).unwrap();
    assert_eq!(3, fx.indexer.unread_count(&fx.store, folder).unwrap());
}

#[test]
fn test_indexer_search_stabilizes() {
    let mut fx = fixture();

    let total = 12;
    for n in 0..total {
        let subject = if n % 3 == 0 { "Invoice due" } else { "Hello" };
        let record = message("alice@localhost", &format!("{} {}", subject, n));
        fx.store.add_message(record).unwrap();
    }
    fx.indexer.drain_events();

    let view = fx
        .indexer
        .start_search(
            &fx.store,
            vec![Search::new("invoice", SearchField::CachedSubject, SearchOption::Exact)],
            0,
        )
        .unwrap();
    assert!(view >= SEARCH_RANGE.0 && view < SEARCH_RANGE.1);
    assert_eq!(ViewKind::Search, fx.indexer.view(view).unwrap().kind);

    // driving the search exactly one turn per message
    let mut turns = 0;
    while fx.indexer.has_active_searches() {
        fx.indexer.continue_search(&fx.store);
        turns += 1;
        assert!(turns <= total);
    }
    assert_eq!(total, turns);
    assert_eq!(None, fx.indexer.search_position(view));

    let stabilized = fx
        .indexer
        .drain_events()
        .into_iter()
        .filter(|event| *event == Notification::SearchStabilized(view))
        .count();
    assert_eq!(1, stabilized);
    assert_eq!(4, fx.indexer.view(view).unwrap().len());

    // checking that further turns do nothing
    assert!(!fx.indexer.continue_search(&fx.store));
    assert!(fx.indexer.drain_events().is_empty());
}

#[test]
fn test_indexer_invalid_regex() {
    let mut fx = fixture();
    fx.add(message("alice@localhost", "Hello"));

    let res = fx.indexer.start_search(
        &fx.store,
        vec![Search::new("(unclosed", SearchField::From, SearchOption::Regexp)],
        0,
    );
    assert!(matches!(res, Err(Error::InvalidRegexError(_, _))));

    // checking that no view was created
    let mut cursor = -1;
    assert_eq!(
        None,
        fx.indexer
            .get_range(SEARCH_RANGE.0, SEARCH_RANGE.1, &mut cursor)
    );
}

#[test]
fn test_indexer_filter_views() {
    let mut fx = fixture();

    let early = fx.add(message("carol@localhost", "Early"));
    let contact = fx.indexer.contact_view(&fx.store, "<Carol@localhost>").unwrap();
    assert_eq!(contact, fx.indexer.contact_view(&fx.store, "carol@localhost").unwrap());

    // existing messages are found by the scan, new ones right away
    while fx.indexer.continue_search(&fx.store) {}
    let late = fx.add(message("carol@localhost", "Late"));
    fx.add(message("dave@localhost", "Other"));

    let members = fx.indexer.get_view(contact).unwrap().members().to_vec();
    assert_eq!(vec![early, late], members);
}

#[test]
fn test_indexer_thread_view() {
    let mut fx = fixture();

    let root = fx.add(MessageRecord {
        message_id: "root@localhost".into(),
        ..message("alice@localhost", "Plans")
    });
    let reply = fx.add(MessageRecord {
        message_id: "reply@localhost".into(),
        headers: Headers {
            in_reply_to: "<root@localhost>".into(),
            ..Headers::default()
        },
        ..message("bob@localhost", "Re: Plans")
    });

    let thread = fx.indexer.create_thread_view(&fx.store, reply).unwrap();
    assert_eq!(Some(thread), fx.indexer.thread_view_of(&fx.store, root));
    assert_eq!(thread, fx.indexer.create_thread_view(&fx.store, root).unwrap());

    // checking that new replies join the thread view
    let next = fx.add(MessageRecord {
        message_id: "next@localhost".into(),
        headers: Headers {
            references: "<root@localhost> <reply@localhost>".into(),
            ..Headers::default()
        },
        ..message("alice@localhost", "Re: Plans")
    });
    let members = fx.indexer.get_view(thread).unwrap().members().to_vec();
    assert_eq!(vec![root, reply, next], members);
}

#[test]
fn test_indexer_spam_training() {
    let mut fx = fixture();

    // checking that an untrained filter stays undecided
    let id = fx.add(message("spammer@localhost", "Cheap pills"));
    assert_eq!(
        Verdict::Undecided,
        fx.indexer.classify(&fx.store, SPAM, id).unwrap()
    );
    assert!(!fx.indexer.get_view(SPAM).unwrap().contains(id));

    // marking messages as spam or not trains the filter
    fx.indexer.spam(&mut fx.store, id).unwrap();
    assert!(fx.indexer.get_view(SPAM).unwrap().contains(id));
    assert!(fx.store.get_flags(id).unwrap().contains(MessageFlags::IS_SPAM));
    assert_eq!(1, fx.indexer.autofilter(SPAM).unwrap().included());

    fx.indexer.not_spam(&mut fx.store, id).unwrap();
    assert!(!fx.indexer.get_view(SPAM).unwrap().contains(id));
    assert_eq!(0, fx.indexer.autofilter(SPAM).unwrap().included());
    assert_eq!(1, fx.indexer.autofilter(SPAM).unwrap().excluded());
}
