use num_bigint::BigUint;
use tgdh_types::{fingerprint, Error, GroupParams, SequenceScalars};

use crate::{MemoryBus, Session, SessionBuilder};

/// Deterministic per-member scalars; the second value keeps sponsor rekeys
/// distinct from the original draw.
fn fixed_scalars(session: SessionBuilder<MemoryBus>) -> SessionBuilder<MemoryBus> {
    session.with_scalar_factory(|mid| {
        Box::new(SequenceScalars::from_u64s([
            mid as u64 + 2,
            mid as u64 + 9,
        ]))
    })
}

/// Tiny hand-checkable group. Fine for agreement assertions, but key-change
/// assertions use the production group: with only 22 possible key values,
/// distinct exponents can collide.
fn deterministic(session: SessionBuilder<MemoryBus>) -> SessionBuilder<MemoryBus> {
    fixed_scalars(session.with_params(GroupParams::toy()))
}

#[test]
fn two_members_agree_on_the_hand_checked_key() {
    // members 1 and 2 hold 3 and 4; the group key is 5^12 mod 23 = 18
    let session = deterministic(Session::builder(2)).start().unwrap();

    let expected = fingerprint(&BigUint::from(18u32));

    assert_eq!(session.group_fingerprint().unwrap(), expected);

    session.close();
}

#[test]
fn initial_exchange_converges_for_small_groups() {
    for n in 2..=9u32 {
        let session = deterministic(Session::builder(n)).start().unwrap();

        assert_eq!(session.member_ids().len(), n as usize);
        session.group_fingerprint().unwrap();

        session.close();
    }
}

#[test]
fn three_member_tree_has_the_expected_shape() {
    let session = deterministic(Session::builder(3)).start().unwrap();

    let rendered = session.render(3).unwrap();

    assert!(rendered.contains("<2,0> mem 1"));
    assert!(rendered.contains("<2,1> mem 2"));
    assert!(rendered.contains("<1,1> mem 3 (me)"));

    session.close();
}

#[test]
fn join_rekeys_the_group() {
    let mut session = fixed_scalars(Session::builder(4)).start().unwrap();
    let before = session.group_fingerprint().unwrap();

    let joined = session.join().unwrap();

    assert_eq!(joined, 5);
    assert_eq!(session.member_ids(), vec![1, 2, 3, 4, 5]);

    let after = session.group_fingerprint().unwrap();

    assert_ne!(before, after);

    session.close();
}

#[test]
fn joins_converge_at_height_four_and_beyond() {
    // from eight members on, the sponsor's key path spans four levels or
    // more, exercising the republish loop bound at depth
    let mut session = deterministic(Session::builder(8)).start().unwrap();

    for expected in 9..=12u32 {
        let joined = session.join().unwrap();

        assert_eq!(joined, expected);
        session.group_fingerprint().unwrap();
    }

    session.close();
}

#[test]
fn leave_rekeys_the_group() {
    let mut session = fixed_scalars(Session::builder(4)).start().unwrap();
    let before = session.group_fingerprint().unwrap();

    session.leave(3).unwrap();

    assert_eq!(session.member_ids(), vec![1, 2, 4]);

    let after = session.group_fingerprint().unwrap();

    assert_ne!(before, after);

    session.close();
}

#[test]
fn leave_of_a_root_child_converges() {
    let mut session = deterministic(Session::builder(3)).start().unwrap();

    session.leave(3).unwrap();

    assert_eq!(session.member_ids(), vec![1, 2]);
    session.group_fingerprint().unwrap();

    session.close();
}

#[test]
fn leave_below_two_members_is_terminal() {
    let mut session = deterministic(Session::builder(2)).start().unwrap();

    let err = session.leave(1).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::GroupEmpty)
    ));

    session.close();
}

#[test]
fn leave_of_an_unknown_member_fails_cleanly() {
    let mut session = deterministic(Session::builder(3)).start().unwrap();

    let err = session.leave(9).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(_))
    ));

    // the session is still usable
    session.join().unwrap();
    session.group_fingerprint().unwrap();

    session.close();
}

#[test]
fn mixed_event_sequence_converges_at_every_step() {
    let mut session = fixed_scalars(Session::builder(4)).start().unwrap();
    let mut seen = vec![session.group_fingerprint().unwrap()];

    assert_eq!(session.join().unwrap(), 5);
    seen.push(session.group_fingerprint().unwrap());

    assert_eq!(session.join().unwrap(), 6);
    seen.push(session.group_fingerprint().unwrap());

    session.leave(3).unwrap();
    seen.push(session.group_fingerprint().unwrap());

    session.leave(2).unwrap();
    seen.push(session.group_fingerprint().unwrap());

    assert_eq!(session.join().unwrap(), 7);
    seen.push(session.group_fingerprint().unwrap());

    assert_eq!(session.member_ids(), vec![1, 4, 5, 6, 7]);

    // every event produced a fresh group key
    for window in seen.windows(2) {
        assert_ne!(window[0], window[1]);
    }

    session.close();
}

#[test]
fn production_parameters_converge() {
    let mut session = Session::in_memory(3).unwrap();

    let before = session.group_fingerprint().unwrap();

    session.join().unwrap();

    let after = session.group_fingerprint().unwrap();

    assert_ne!(before, after);

    session.leave(2).unwrap();
    session.group_fingerprint().unwrap();

    session.close();
}
