use mailbase_lib::{
    group::GroupKind,
    indexer::Indexer,
    store::{LoadProgress, MemoryBodyStore},
    view::{ViewId, FOLDERS},
    EngineConfig, MessageId, Store,
};
use std::collections::BTreeSet;
use tempfile::tempdir;

/// Small deterministic generator, enough to shuffle the operations.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn members(indexer: &Indexer, view: ViewId) -> BTreeSet<MessageId> {
    indexer.view(view).unwrap().members().iter().collect()
}

#[test]
fn test_groups_match_full_computation() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir().unwrap();
    let config = EngineConfig::with_root_dir(dir.path());
    let mut store = Store::open(&config, dir.path(), Box::new(MemoryBodyStore::new())).unwrap();
    while store.load_step().unwrap() != LoadProgress::Done {}
    let mut indexer = Indexer::in_memory(&config).unwrap();

    // set up folders and groups

    let folders: Vec<ViewId> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| indexer.add_folder_view(name, FOLDERS).unwrap())
        .collect();
    let (a, b, c, d) = (folders[0], folders[1], folders[2], folders[3]);

    let union = indexer
        .new_group(GroupKind::Union, 0, vec![a, b], "a or b")
        .unwrap();
    let inter = indexer
        .new_group(GroupKind::Intersection, a, vec![b, c], "a and b and c")
        .unwrap();
    let compl = indexer
        .new_group(GroupKind::Complement, a, vec![c, d], "a but not c nor d")
        .unwrap();
    let chained = indexer
        .new_group(GroupKind::Union, 0, vec![inter, compl], "chained")
        .unwrap();

    // checking that cycles are rejected

    assert!(indexer.add_group_operand(inter, chained).is_err());
    assert!(indexer.add_group_operand(chained, chained).is_err());

    // applying random changes

    let mut rng = XorShift(0x2545_f491_4f6c_dd1d);
    let mut union_has_d = false;

    for step in 0..400 {
        match rng.below(10) {
            0 => {
                if union_has_d {
                    indexer.remove_group_operand(union, d).unwrap();
                } else {
                    indexer.add_group_operand(union, d).unwrap();
                }
                union_has_d = !union_has_d;
            }
            1..=5 => {
                let folder = folders[rng.below(4) as usize];
                let id = rng.below(30) as MessageId + 1;
                indexer.add_message(&store, folder, id).unwrap();
            }
            _ => {
                let folder = folders[rng.below(4) as usize];
                let id = rng.below(30) as MessageId + 1;
                indexer.remove_message_from(&store, folder, id).unwrap();
            }
        }

        let (ma, mb, mc, md) = (
            members(&indexer, a),
            members(&indexer, b),
            members(&indexer, c),
            members(&indexer, d),
        );

        let mut expected_union: BTreeSet<MessageId> = ma.union(&mb).copied().collect();
        if union_has_d {
            expected_union.extend(md.iter().copied());
        }
        let expected_inter: BTreeSet<MessageId> = ma
            .iter()
            .filter(|id| mb.contains(id) && mc.contains(id))
            .copied()
            .collect();
        let expected_compl: BTreeSet<MessageId> = ma
            .iter()
            .filter(|id| !mc.contains(id) && !md.contains(id))
            .copied()
            .collect();
        let expected_chained: BTreeSet<MessageId> =
            expected_inter.union(&expected_compl).copied().collect();

        assert_eq!(expected_union, members(&indexer, union), "union at step {}", step);
        assert_eq!(expected_inter, members(&indexer, inter), "intersection at step {}", step);
        assert_eq!(expected_compl, members(&indexer, compl), "complement at step {}", step);
        assert_eq!(expected_chained, members(&indexer, chained), "chained at step {}", step);
    }

    assert!(!indexer.needs_rebuild());

    // checking that removing a base removes the groups built on it

    indexer.remove_view(a).unwrap();
    assert!(indexer.view(inter).is_none());
    assert!(indexer.view(compl).is_none());
    assert!(indexer.view(union).is_some());
    assert!(!members(&indexer, union).is_empty() || members(&indexer, b).is_empty());
}

#[test]
fn test_groups_reconcile_populated_operands() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir().unwrap();
    let config = EngineConfig::with_root_dir(dir.path());
    let mut store = Store::open(&config, dir.path(), Box::new(MemoryBodyStore::new())).unwrap();
    while store.load_step().unwrap() != LoadProgress::Done {}
    let mut indexer = Indexer::in_memory(&config).unwrap();

    let folders: Vec<ViewId> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| indexer.add_folder_view(name, FOLDERS).unwrap())
        .collect();
    let (a, b, c, d, e) = (folders[0], folders[1], folders[2], folders[3], folders[4]);

    // filling the folders before any group exists

    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    for folder in &folders {
        for _ in 0..20 {
            let id = rng.below(30) as MessageId + 1;
            indexer.add_message(&store, *folder, id).unwrap();
        }
    }

    let inter = indexer
        .new_group(GroupKind::Intersection, a, vec![b], "a and b")
        .unwrap();
    let compl = indexer
        .new_group(GroupKind::Complement, a, vec![c], "a but not c")
        .unwrap();
    let (mut inter_has_d, mut compl_has_e) = (false, false);

    for step in 0..400 {
        match rng.below(8) {
            0 => {
                if inter_has_d {
                    indexer.remove_group_operand(inter, d).unwrap();
                } else {
                    indexer.add_group_operand(inter, d).unwrap();
                }
                inter_has_d = !inter_has_d;
            }
            1 => {
                if compl_has_e {
                    indexer.remove_group_operand(compl, e).unwrap();
                } else {
                    indexer.add_group_operand(compl, e).unwrap();
                }
                compl_has_e = !compl_has_e;
            }
            2..=4 => {
                let folder = folders[rng.below(5) as usize];
                let id = rng.below(30) as MessageId + 1;
                indexer.add_message(&store, folder, id).unwrap();
            }
            _ => {
                let folder = folders[rng.below(5) as usize];
                let id = rng.below(30) as MessageId + 1;
                indexer.remove_message_from(&store, folder, id).unwrap();
            }
        }

        let (ma, mb, mc, md, me) = (
            members(&indexer, a),
            members(&indexer, b),
            members(&indexer, c),
            members(&indexer, d),
            members(&indexer, e),
        );

        let expected_inter: BTreeSet<MessageId> = ma
            .iter()
            .filter(|id| mb.contains(id) && (!inter_has_d || md.contains(id)))
            .copied()
            .collect();
        let expected_compl: BTreeSet<MessageId> = ma
            .iter()
            .filter(|id| !mc.contains(id) && (!compl_has_e || !me.contains(id)))
            .copied()
            .collect();

        assert_eq!(expected_inter, members(&indexer, inter), "intersection at step {}", step);
        assert_eq!(expected_compl, members(&indexer, compl), "complement at step {}", step);
    }
}

#[test]
fn test_groups_refuse_direct_changes() {
    let dir = tempdir().unwrap();
    let config = EngineConfig::with_root_dir(dir.path());
    let store = Store::open(&config, dir.path(), Box::new(MemoryBodyStore::new())).unwrap();
    let mut indexer = Indexer::in_memory(&config).unwrap();

    let folder = indexer.add_folder_view("folder", FOLDERS).unwrap();
    let union = indexer
        .new_group(GroupKind::Union, 0, vec![folder], "union")
        .unwrap();

    assert!(indexer.add_message(&store, union, 1).is_err());
    assert!(indexer.add_message(&store, folder, 1).unwrap());
    assert!(indexer.view(union).unwrap().contains(1));
    assert!(indexer.remove_message_from(&store, union, 1).is_err());
}
