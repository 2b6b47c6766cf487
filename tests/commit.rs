/*
 * Copyright 2024-2025 The cask-store developers
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use spectral::assert_that;
use spectral::prelude::*;

mod common;

use common::test_repo;

#[test]
fn empty_commit_returns_empty_hash() {
    let fixture = test_repo();

    let (hash, empty) = fixture.repo.commit("test empty commit").unwrap();
    assert_that!(empty).is_true();
    assert_that!(hash).is_equal_to(String::new());
    assert!(fixture.repo.list_commits().unwrap().is_empty());
}

#[test]
fn single_commit_produces_a_hash() {
    let fixture = test_repo();

    fixture.repo.add(&b"hello cask"[..]).unwrap();
    let (hash, empty) = fixture.repo.commit("1st commit").unwrap();

    assert_that!(empty).is_false();
    assert_that!(hash.len()).is_equal_to(128);

    let commits = fixture.repo.list_commits().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "1st commit");
    assert_eq!(commits[0].hash, hash);
}

#[test]
fn commit_after_commit_is_empty() {
    let fixture = test_repo();

    fixture.repo.add(&b"hello cask"[..]).unwrap();
    fixture.repo.commit("1st commit").unwrap();

    let (hash, empty) = fixture.repo.commit("test empty commit").unwrap();
    assert!(empty);
    assert!(hash.is_empty());
}

#[test]
fn commit_clears_the_staged_set() {
    let fixture = test_repo();

    let (hash, _) = fixture.repo.add(&b"staged contents"[..]).unwrap();
    assert_eq!(fixture.repo.status().unwrap(), vec![hash]);

    fixture.repo.commit("commit staged").unwrap();
    assert!(fixture.repo.status().unwrap().is_empty());
}

#[test]
fn adding_the_same_blob_twice_stages_it_once() {
    let fixture = test_repo();

    let (first_hash, first_new) = fixture.repo.add(&b"same bytes"[..]).unwrap();
    let (second_hash, second_new) = fixture.repo.add(&b"same bytes"[..]).unwrap();

    assert_eq!(first_hash, second_hash);
    assert!(first_new);
    assert!(!second_new);
    assert_eq!(fixture.repo.status().unwrap().len(), 1);
}

#[test]
fn commits_are_listed_newest_first() {
    let fixture = test_repo();

    fixture.repo.add(&b"a"[..]).unwrap();
    fixture.repo.commit("A").unwrap();

    fixture.repo.add(&b"b"[..]).unwrap();
    fixture.repo.commit("B").unwrap();

    fixture.repo.add(&b"c"[..]).unwrap();
    fixture.repo.commit("C").unwrap();

    let messages = fixture
        .repo
        .list_commits()
        .unwrap()
        .into_iter()
        .map(|commit| commit.message)
        .collect::<Vec<_>>();
    assert_eq!(messages, vec!["C", "B", "A"]);
}

#[test]
fn forked_commits_join_both_parents_warm() {
    let fixture = test_repo();

    fixture.repo.add(&b"first"[..]).unwrap();
    fixture.repo.commit("1st commit").unwrap();

    fixture.repo.add(&b"second"[..]).unwrap();
    let (parent, _) = fixture.repo.commit("2nd commit").unwrap();

    fixture.repo.add(&b"third"[..]).unwrap();
    let (fork_one, _) = fixture.repo.commit("3rd commit").unwrap();

    fixture.repo.add(&b"fork at the 2nd commit"[..]).unwrap();
    let (fork_two, _) = fixture
        .repo
        .commit_with_warm_and_cold_parents("forked", "master", "", vec![parent], vec![])
        .unwrap();

    fixture.repo.add(&b"joining both forks"[..]).unwrap();
    let (join, _) = fixture
        .repo
        .commit_with_parents("join", "master", &[fork_one.clone(), fork_two.clone()])
        .unwrap();

    // Both forks become warm parents of the join; nothing is forked off.
    let commits = fixture.repo.list_commits().unwrap();
    assert_eq!(commits[0].hash, join);
    assert!(commits[0].warm_parents.contains(&fork_one));
    assert!(commits[0].warm_parents.contains(&fork_two));
    assert!(commits[0].cold_parents.is_empty());

    let listed = commits.iter().map(|commit| commit.hash.clone()).collect::<Vec<_>>();
    assert!(listed.contains(&fork_one));
    assert!(listed.contains(&fork_two));

    // The join is now the only top-most commit, so an empty default commit
    // is possible again.
    let (_, empty) = fixture.repo.commit("empty after join").unwrap();
    assert!(empty);
}

#[test]
fn forked_commit_with_one_parent_leaves_the_other_cold() {
    let fixture = test_repo();

    fixture.repo.add(&b"first"[..]).unwrap();
    fixture.repo.commit("1st commit").unwrap();

    fixture.repo.add(&b"second"[..]).unwrap();
    let (parent, _) = fixture.repo.commit("2nd commit").unwrap();

    fixture.repo.add(&b"third"[..]).unwrap();
    let (fork_one, _) = fixture.repo.commit("3rd commit").unwrap();

    fixture.repo.add(&b"fork at the 2nd commit"[..]).unwrap();
    fixture
        .repo
        .commit_with_warm_and_cold_parents("forked", "master", "", vec![parent], vec![])
        .unwrap();

    fixture.repo.add(&b"selecting fork one"[..]).unwrap();
    let (join, _) = fixture
        .repo
        .commit_with_parents("join fork one", "master", &[fork_one])
        .unwrap();

    // Walking the history from the single remaining head reaches the chain
    // of fork one but not the cold fork.
    let commits = fixture.repo.list_commits().unwrap();
    let messages = commits.iter().map(|commit| commit.message.clone()).collect::<Vec<_>>();
    assert_eq!(messages[0], "join fork one");
    assert!(messages.contains(&String::from("3rd commit")));
    assert!(messages.contains(&String::from("1st commit")));
    assert!(!messages.contains(&String::from("forked")));

    assert_eq!(commits[0].hash, join);
    assert_eq!(commits[0].warm_parents.len(), 1);
    assert_eq!(commits[0].cold_parents.len(), 1);
}

#[test]
fn default_commit_with_multiple_heads_is_rejected() {
    let fixture = test_repo();

    fixture.repo.add(&b"first"[..]).unwrap();
    let (parent, _) = fixture.repo.commit("1st commit").unwrap();

    fixture.repo.add(&b"second"[..]).unwrap();
    fixture.repo.commit("2nd commit").unwrap();

    // Fork off the first commit, leaving two heads.
    fixture.repo.add(&b"fork"[..]).unwrap();
    fixture
        .repo
        .commit_with_warm_and_cold_parents("forked", "master", "", vec![parent], vec![])
        .unwrap();

    fixture.repo.add(&b"stuck"[..]).unwrap();
    assert!(matches!(
        fixture.repo.commit("cannot pick a parent"),
        Err(cask_store::Error::BrokenInvariant(_))
    ));
}

#[test]
fn commit_timestamps_are_rfc3339() {
    let fixture = test_repo();

    fixture.repo.add(&b"data"[..]).unwrap();
    fixture.repo.commit("stamped").unwrap();

    let commits = fixture.repo.list_commits().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&commits[0].time_stamp).is_ok());
}
