//! Election under contention from several threads at once.

use std::sync::{Arc, Barrier};
use std::thread;

use tab_switcher::election::LeaderElection;

fn race(candidates: &mut [LeaderElection]) -> Vec<usize> {
    let barrier = Arc::new(Barrier::new(candidates.len()));
    thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .iter_mut()
            .map(|candidate| {
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    candidate.try_become_leader()
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .filter_map(|(i, h)| h.join().unwrap().then_some(i))
            .collect()
    })
}

#[test]
fn simultaneous_candidates_elect_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hook.lock");
    let mut candidates: Vec<_> = (0..8).map(|_| LeaderElection::new(&path)).collect();

    let winners = race(&mut candidates);
    assert_eq!(winners.len(), 1, "winners: {winners:?}");
    assert_eq!(
        LeaderElection::current_holder(&path),
        Some(std::process::id())
    );
}

#[test]
fn one_poll_round_after_leader_exit_elects_one_successor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hook.lock");
    let mut candidates: Vec<_> = (0..5).map(|_| LeaderElection::new(&path)).collect();

    let first = race(&mut candidates);
    assert_eq!(first.len(), 1);

    // Leader exits; the rest poll once, concurrently.
    let leader = candidates.remove(first[0]);
    drop(leader);
    assert_eq!(LeaderElection::current_holder(&path), None);

    let second = race(&mut candidates);
    assert_eq!(second.len(), 1, "winners: {second:?}");

    // Everyone else stays a follower on the next round too.
    let again = race(&mut candidates);
    assert_eq!(again, second, "the leader keeps winning, nobody else does");
}
