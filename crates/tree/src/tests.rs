use alloc::sync::Arc;
use alloc::vec::Vec;

use num_bigint::BigUint;
use proptest::prelude::*;
use tgdh_types::{
    Error, GroupParams, MemberId, NodeKind, NodeName, SequenceScalars,
};

use crate::node::NodeIdx;
use crate::KeyTree;

fn params() -> Arc<GroupParams> {
    Arc::new(GroupParams::toy())
}

fn name(l: u32, v: u32) -> NodeName {
    NodeName::new(l, v)
}

fn scalar_of(uid: MemberId) -> u64 {
    uid as u64 + 2
}

fn tree(n: u32, uid: MemberId) -> KeyTree {
    KeyTree::new(n, uid, params()).unwrap()
}

fn keyed_tree(n: u32, uid: MemberId) -> KeyTree {
    let mut t = tree(n, uid);
    let mut source = SequenceScalars::from_u64s([scalar_of(uid)]);

    t.generate_leaf_key(&mut source).unwrap();

    t
}

/// A fully keyed tree, as an omniscient observer would compute it: every leaf
/// holds its member's scalar and every internal key is derived bottom-up.
fn oracle(n: u32) -> KeyTree {
    let mut t = tree(n, 1);

    for idx in t.leaves() {
        let mid = t.node(idx).mid.unwrap();
        let key = BigUint::from(scalar_of(mid));
        let bkey = t.params.blind(&key);
        let node = t.node_mut(idx);

        node.key = Some(key);
        node.bkey = Some(bkey);
    }

    let root = t.root;
    derive_all(&mut t, root);

    t
}

fn derive_all(t: &mut KeyTree, idx: NodeIdx) {
    let (left, right) = {
        let n = t.node(idx);
        (n.left, n.right)
    };

    let (Some(left), Some(right)) = (left, right) else {
        return;
    };

    derive_all(t, left);
    derive_all(t, right);

    let right_bkey = t.node(right).bkey.clone().unwrap();
    let left_key = t.node(left).key.clone().unwrap();
    let key = t.params.mix(&right_bkey, &left_key);
    let bkey = (idx != t.root).then(|| t.params.blind(&key));
    let node = t.node_mut(idx);

    node.key = Some(key);
    node.bkey = bkey;
}

fn shape_of(t: &KeyTree) -> Vec<(NodeName, Option<MemberId>, bool)> {
    t.preorder()
        .into_iter()
        .map(|idx| {
            let n = t.node(idx);
            (n.name, n.mid, n.is_leaf())
        })
        .collect()
}

fn leaf_ids(t: &KeyTree) -> Vec<(NodeName, MemberId)> {
    t.leaves()
        .into_iter()
        .map(|idx| {
            let n = t.node(idx);
            (n.name, n.mid.unwrap())
        })
        .collect()
}

#[test]
fn initial_shape_is_left_packed() {
    //     R
    //    / \
    //   o   3
    //  / \
    // 1   2
    let t = tree(3, 1);

    assert_eq!(t.node_count(), 5);
    assert_eq!(
        leaf_ids(&t),
        alloc::vec![(name(2, 0), 1), (name(2, 1), 2), (name(1, 1), 3)]
    );

    //        R
    //      /   \
    //     o     o
    //    / \   / \
    //   o   o 5   6
    //  /\   /\
    // 1  2 3  4
    let t = tree(6, 4);

    assert_eq!(t.node_count(), 11);
    assert_eq!(
        leaf_ids(&t),
        alloc::vec![
            (name(3, 0), 1),
            (name(3, 1), 2),
            (name(3, 2), 3),
            (name(3, 3), 4),
            (name(2, 2), 5),
            (name(2, 3), 6),
        ]
    );

    t.validate().unwrap();
}

#[test]
fn initial_shape_is_deterministic_across_members() {
    for n in 2..=64u32 {
        let reference = shape_of(&tree(n, 1));

        for uid in 2..=n {
            assert_eq!(shape_of(&tree(n, uid)), reference, "size {n}, member {uid}");
        }
    }
}

#[test]
fn members_locate_their_own_leaf() {
    for n in [2u32, 3, 5, 8] {
        for uid in 1..=n {
            let t = tree(n, uid);
            let me = t.my_node().unwrap();

            assert_eq!(t.uid(), uid);
            assert_eq!(me.member(), Some(uid));
            assert!(me.is_leaf());
        }
    }
}

#[test]
fn insertion_point_is_the_rightmost_shallow_leaf() {
    let t = tree(3, 1);
    assert_eq!(t.node(t.find_insertion()).name, name(1, 1));

    let t = tree(4, 1);
    let ins = t.find_insertion();
    assert_eq!(t.node(ins).name, name(2, 3));
    assert_eq!(t.node(ins).mid, Some(4));

    let t = tree(5, 1);
    let ins = t.find_insertion();
    assert_eq!(t.node(ins).name, name(2, 3));
    assert_eq!(t.node(ins).mid, Some(5));
}

#[test]
fn key_and_co_paths() {
    let t = tree(3, 1);

    assert_eq!(
        t.my_key_path().unwrap(),
        alloc::vec![name(2, 0), name(1, 0), name(0, 0)]
    );
    assert_eq!(t.my_co_path().unwrap(), alloc::vec![name(2, 1), name(1, 1)]);

    let t = tree(3, 3);

    assert_eq!(t.my_key_path().unwrap(), alloc::vec![name(1, 1), name(0, 0)]);
    assert_eq!(t.my_co_path().unwrap(), alloc::vec![name(1, 0)]);

    assert!(matches!(t.sibling(t.root), Err(Error::Structure(_))));
}

#[test]
fn max_height_matches_the_schedule_bound() {
    assert_eq!(KeyTree::max_height(2), 1);
    assert_eq!(KeyTree::max_height(3), 2);
    assert_eq!(KeyTree::max_height(4), 2);
    assert_eq!(KeyTree::max_height(5), 3);
    assert_eq!(KeyTree::max_height(8), 3);
    assert_eq!(KeyTree::max_height(9), 4);
}

#[test]
fn two_member_exchange_derives_eighteen() {
    // members 1 and 2 pick 3 and 4; both land on 5^12 mod 23 = 18
    let mut a = keyed_tree(2, 1);
    let mut b = keyed_tree(2, 2);

    let a_leaf = a.blind_key(name(1, 0)).unwrap();
    let b_leaf = b.blind_key(name(1, 1)).unwrap();

    a.set_blind_key(name(1, 1), b_leaf).unwrap();
    b.set_blind_key(name(1, 0), a_leaf).unwrap();

    a.calculate_group_key().unwrap();
    b.calculate_group_key().unwrap();

    assert_eq!(a.root_key(), Some(&BigUint::from(18u32)));
    assert_eq!(b.root_key(), Some(&BigUint::from(18u32)));
    assert_eq!(a.root_fingerprint(), b.root_fingerprint());
}

#[test]
fn group_key_agreement_at_tree_level() {
    for n in [2u32, 3, 4, 5, 8] {
        let oracle = oracle(n);
        let expected = oracle.root_key().cloned().unwrap();

        for uid in 1..=n {
            let mut t = keyed_tree(n, uid);

            for co in t.my_co_path().unwrap() {
                t.set_blind_key(co, oracle.blind_key(co).unwrap()).unwrap();
            }

            t.calculate_group_key().unwrap();

            assert_eq!(t.root_key(), Some(&expected), "size {n}, member {uid}");

            // every co-path blinded key is defined afterwards
            for co in t.my_co_path().unwrap() {
                assert!(t.blind_key(co).is_ok());
            }
        }

        // recurrence soundness: both children of any internal node agree
        for idx in oracle.preorder() {
            let node = oracle.node(idx);

            let (Some(l), Some(r)) = (node.left, node.right) else {
                continue;
            };

            let l = oracle.node(l);
            let r = oracle.node(r);

            let via_left = oracle
                .params()
                .mix(l.bkey.as_ref().unwrap(), r.key.as_ref().unwrap());
            let via_right = oracle
                .params()
                .mix(r.bkey.as_ref().unwrap(), l.key.as_ref().unwrap());

            assert_eq!(via_left, via_right);
            assert_eq!(Some(&via_left), node.key.as_ref());
        }
    }
}

#[test]
fn bounded_recurrence_stops_at_missing_keys() {
    let mut t = keyed_tree(4, 1);

    assert_eq!(
        t.calculate_group_key(),
        Err(Error::MissingBlindKey(name(2, 1)))
    );

    let oracle = oracle(4);

    t.set_blind_key(name(2, 1), oracle.blind_key(name(2, 1)).unwrap())
        .unwrap();
    t.initial_calculate_group_key(1).unwrap();

    assert!(t.root_key().is_none());
    assert!(t.blind_key(name(1, 0)).is_ok());

    assert_eq!(
        t.calculate_group_key(),
        Err(Error::MissingBlindKey(name(1, 1)))
    );

    t.set_blind_key(name(1, 1), oracle.blind_key(name(1, 1)).unwrap())
        .unwrap();
    t.calculate_group_key().unwrap();

    assert_eq!(t.root_key(), oracle.root_key());
}

#[test]
fn blind_key_requires_private_key() {
    let t = tree(2, 1);

    assert_eq!(t.blind_key(name(1, 0)), Err(Error::Uninit(name(1, 0))));
    assert_eq!(
        t.blind_key(name(5, 0)),
        Err(Error::NotFound("node <5,0>".into()))
    );

    let t = keyed_tree(2, 1);

    assert!(t.blind_key(name(1, 0)).is_ok());
}

#[test]
fn join_reshapes_and_marks_sponsor() {
    let mut trees: Vec<KeyTree> = (1..=4).map(|uid| keyed_tree(4, uid)).collect();

    for t in &mut trees {
        let summary = t.join_event().unwrap();

        assert_eq!(summary.sponsor, 4);
        assert_eq!(summary.joined, 5);
        assert_eq!(t.next_member(), 6);
        assert_eq!(
            t.refresh_path(),
            &[name(3, 7), name(2, 3), name(1, 1), name(0, 0)]
        );

        t.validate().unwrap();
    }

    let reference = shape_of(&trees[0]);

    for t in &trees[1..] {
        assert_eq!(shape_of(t), reference);
    }

    // the sponsor inherited its old identity, key included, one level deeper
    let sponsor = trees[3].my_node().unwrap();

    assert_eq!(sponsor.name(), name(3, 6));
    assert_eq!(sponsor.kind(), NodeKind::Spon);
    assert_eq!(sponsor.member(), Some(4));
    assert!(sponsor.private_key().is_some());

    // a bystander needs exactly the refreshed node on its co-path
    assert_eq!(trees[0].update_path().unwrap(), alloc::vec![name(1, 1)]);

    // the unbalanced case fills the shallow level back up
    let mut t = keyed_tree(3, 2);
    let summary = t.join_event().unwrap();

    assert_eq!(summary.sponsor, 3);
    assert_eq!(summary.joined, 4);
    assert_eq!(
        leaf_ids(&t),
        alloc::vec![
            (name(2, 0), 1),
            (name(2, 1), 2),
            (name(2, 2), 3),
            (name(2, 3), 4),
        ]
    );

    t.validate().unwrap();
}

#[test]
fn leave_promotes_sibling_and_picks_sponsor() {
    let mut t = keyed_tree(4, 1);
    let before = shape_of(&t);

    let summary = t.leave_event(3).unwrap();

    assert_eq!(summary.sponsor, 4);
    assert_eq!(summary.departed, 3);
    assert_eq!(t.node_count(), 5);
    assert_eq!(t.live_members(), alloc::vec![1, 2, 4]);
    assert!(!t.contains_member(3));
    assert!(t.contains_member(4));
    assert_ne!(shape_of(&t), before);

    let spon = t.find_by_mid(4).unwrap();
    let spon = t.node(spon);

    assert_eq!(spon.name, name(1, 1));
    assert_eq!(spon.kind, NodeKind::Spon);
    assert!(spon.key.is_none());
    assert!(spon.bkey.is_none());

    assert_eq!(t.refresh_path(), &[name(1, 1), name(0, 0)]);
    assert_eq!(t.update_path().unwrap(), alloc::vec![name(1, 1)]);

    t.validate().unwrap();
}

#[test]
fn leave_of_root_child_promotes_the_sibling_subtree() {
    let mut t = keyed_tree(3, 1);

    let summary = t.leave_event(3).unwrap();

    assert_eq!(summary.sponsor, 2);
    assert_eq!(t.node_count(), 3);
    assert_eq!(leaf_ids(&t), alloc::vec![(name(1, 0), 1), (name(1, 1), 2)]);
    assert_eq!(t.refresh_path(), &[name(1, 1), name(0, 0)]);

    // my private key survived the promotion
    assert!(t.my_node().unwrap().private_key().is_some());

    t.validate().unwrap();
}

#[test]
fn leave_to_single_member_fails_group_empty() {
    let mut t = keyed_tree(2, 2);

    assert_eq!(t.leave_event(1), Err(Error::GroupEmpty));

    // untouched
    assert_eq!(t.node_count(), 3);
    assert_eq!(t.live_members(), alloc::vec![1, 2]);
}

#[test]
fn leave_of_unknown_member_fails_not_found() {
    let mut t = keyed_tree(4, 1);

    assert!(matches!(t.leave_event(9), Err(Error::NotFound(_))));
}

#[test]
fn snapshot_round_trips() {
    let t = keyed_tree(4, 2);
    let snapshot = t.snapshot();
    let restored = KeyTree::from_snapshot(&snapshot, params()).unwrap();

    assert_eq!(restored.next_member(), t.next_member());
    assert_eq!(shape_of(&restored), shape_of(&t));

    for idx in restored.preorder() {
        let node = restored.node(idx);

        // no private key crosses a snapshot
        assert!(node.key.is_none());

        let original = t.find_by_name(node.name).unwrap();

        assert_eq!(node.kind, t.node(original).kind);
        assert_eq!(node.bkey, t.node(original).bkey);
    }

    restored.validate().unwrap();
}

#[test]
fn snapshot_rejects_malformed_trees() {
    let t = keyed_tree(4, 1);
    let snapshot = t.snapshot();

    let mut missing = snapshot.clone();
    missing.nodes.retain(|n| n.name != name(2, 0));
    assert!(KeyTree::from_snapshot(&missing, params()).is_err());

    let mut duplicated = snapshot.clone();
    let extra = duplicated.nodes[1].clone();
    duplicated.nodes.push(extra);
    assert!(KeyTree::from_snapshot(&duplicated, params()).is_err());
}

#[test]
fn join_handshake_at_tree_level() {
    // founders agree first
    let oracle_pre = oracle(2);
    let pre_key = oracle_pre.root_key().cloned().unwrap();

    let mut trees: Vec<KeyTree> = (1..=2).map(|uid| keyed_tree(2, uid)).collect();

    for t in &mut trees {
        for co in t.my_co_path().unwrap() {
            t.set_blind_key(co, oracle_pre.blind_key(co).unwrap()).unwrap();
        }

        t.calculate_group_key().unwrap();
        assert_eq!(t.root_key(), Some(&pre_key));
    }

    // the mutation runs on every member
    for t in &mut trees {
        let summary = t.join_event().unwrap();

        assert_eq!(summary.sponsor, 2);
        assert_eq!(summary.joined, 3);
    }

    // the sponsor ships a snapshot; the new member claims its leaf
    let snapshot = trees[1].snapshot();
    let mut joiner = KeyTree::from_snapshot(&snapshot, params()).unwrap();
    let mut source = SequenceScalars::from_u64s([scalar_of(3)]);

    assert_eq!(joiner.new_member_setup(&mut source).unwrap(), 3);

    // new member publishes its blinded leaf to the sponsor
    let announce = joiner.blind_key(name(2, 3)).unwrap();

    trees[1].set_blind_key(name(2, 3), announce).unwrap();
    trees[1].calculate_group_key().unwrap();
    joiner.calculate_group_key().unwrap();

    // sponsor republishes its refreshed path; the bystander needs <1,1>
    assert_eq!(trees[0].update_path().unwrap(), alloc::vec![name(1, 1)]);

    let refreshed = trees[1].blind_key(name(1, 1)).unwrap();

    trees[0].set_blind_key(name(1, 1), refreshed).unwrap();
    trees[0].calculate_group_key().unwrap();

    let post = trees[1].root_key().cloned().unwrap();

    assert_eq!(trees[0].root_key(), Some(&post));
    assert_eq!(joiner.root_key(), Some(&post));
    assert_ne!(post, pre_key);
}

#[test]
fn render_shows_structure_without_raw_keys() {
    let mut t = KeyTree::new(2, 1, Arc::new(GroupParams::modp_2048())).unwrap();
    let mut source = SequenceScalars::from_u64s([0x1d5ab37e9]);

    t.generate_leaf_key(&mut source).unwrap();

    let rendered = alloc::format!("{t}");
    let bkey = t.my_node().unwrap().blind_key().cloned().unwrap();

    assert!(rendered.contains("<0,0> root"));
    assert!(rendered.contains("mem 1 (me)"));
    assert!(!rendered.contains(&bkey.to_string()));
}

proptest! {
    #[test]
    fn random_membership_sequences_keep_invariants(
        n in 2u32..10,
        events in proptest::collection::vec(any::<u16>(), 0..12),
    ) {
        let mut t = tree(n, 1);

        for e in events {
            let live = t.live_members();

            if e % 2 == 0 {
                t.join_event().unwrap();
            } else {
                // never remove the owner, and never empty the group
                let candidates: Vec<MemberId> =
                    live.iter().copied().filter(|m| *m != 1).collect();

                if live.len() <= 2 || candidates.is_empty() {
                    continue;
                }

                let target = candidates[(e / 2) as usize % candidates.len()];

                t.leave_event(target).unwrap();
            }

            t.validate().unwrap();

            // exactly one sponsor after any event
            let sponsors = t
                .leaves()
                .into_iter()
                .filter(|idx| t.node(*idx).kind == NodeKind::Spon)
                .count();

            prop_assert_eq!(sponsors, 1);
            prop_assert!(!t.refresh_path().is_empty());
        }
    }
}
