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
use std::io::Read;

use rstest::rstest;

mod common;

use common::{count_leaf_files, random_bytes, random_buffer, test_repo, TEST_LEAF_SIZE};

#[test]
fn add_then_get_round_trips() {
    let fixture = test_repo();
    let data = random_buffer();

    let (hash, is_new) = fixture.repo.add(data.as_slice()).unwrap();
    assert!(is_new);

    let mut read_back = Vec::new();
    fixture.repo.get(&hash).unwrap().read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, data);
}

#[rstest]
#[case::empty(0)]
#[case::single_byte(1)]
#[case::below_leaf_boundary(TEST_LEAF_SIZE as usize - 1)]
#[case::above_leaf_boundary(TEST_LEAF_SIZE as usize + 1)]
#[case::several_leaves(TEST_LEAF_SIZE as usize * 7 + TEST_LEAF_SIZE as usize / 2)]
fn round_trip_at_boundaries(#[case] size: usize) {
    let fixture = test_repo();
    let data = random_bytes(size);

    let (hash, _) = fixture.repo.add(data.as_slice()).unwrap();

    let mut read_back = Vec::new();
    fixture.repo.get(&hash).unwrap().read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, data);
}

#[test]
fn seven_and_a_half_leaves_are_stored_as_eight() {
    let fixture = test_repo();
    let data = random_bytes(TEST_LEAF_SIZE as usize * 7 + TEST_LEAF_SIZE as usize / 2);

    fixture.repo.add(data.as_slice()).unwrap();
    assert_eq!(count_leaf_files(fixture.directory.path(), "stage"), 8);
}

#[test]
fn exact_leaf_size_stream_gets_an_empty_last_leaf() {
    let fixture = test_repo();
    let data = random_bytes(TEST_LEAF_SIZE as usize);

    let (hash, _) = fixture.repo.add(data.as_slice()).unwrap();

    // One full leaf plus the zero-length last leaf.
    assert_eq!(count_leaf_files(fixture.directory.path(), "stage"), 2);

    let mut read_back = Vec::new();
    fixture.repo.get(&hash).unwrap().read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, data);
}

#[test]
fn sum_matches_the_stored_digest() {
    let fixture = test_repo();
    let data = random_bytes(TEST_LEAF_SIZE as usize * 3 + 17);

    let expected = fixture.repo.sum(data.as_slice()).unwrap();
    let (hash, _) = fixture.repo.add(data.as_slice()).unwrap();
    assert_eq!(hash, expected);
}

#[test]
fn get_of_unknown_digest_fails() {
    let fixture = test_repo();
    let unknown = "ab".repeat(64);

    assert!(matches!(
        fixture.repo.get(&unknown),
        Err(cask_store::Error::NotFound)
    ));
}

#[test]
fn list_filters_blobs_by_hex_prefix() {
    let fixture = test_repo();

    let mut hashes = Vec::new();
    for index in 0u8..6 {
        let (hash, _) = fixture.repo.add(&[index][..]).unwrap();
        hashes.push(hash);
    }

    let all = fixture.repo.list("").unwrap();
    assert_eq!(all.len(), hashes.len());

    let target = &hashes[2];
    let matches = fixture.repo.list(&target[..5]).unwrap();
    assert!(matches.contains(target));
    for hash in &matches {
        assert!(hash.starts_with(&target[..5]));
    }
}

#[test]
fn statistics_count_blob_entries() {
    let fixture = test_repo();

    for index in 0u8..4 {
        fixture.repo.add(&[index][..]).unwrap();
    }

    assert_eq!(fixture.repo.statistics().unwrap().objects, 4);
}

#[test]
fn snapshot_and_checkout_round_trip() {
    let fixture = test_repo();

    let source = fixture.directory.path().join("source");
    std::fs::create_dir_all(source.join("nested")).unwrap();
    std::fs::write(source.join("top.txt"), b"top contents").unwrap();
    std::fs::write(source.join("nested").join("inner.txt"), b"inner contents").unwrap();

    let (commit_hash, empty) = fixture.repo.snapshot("snapshotted", &source).unwrap();
    assert!(!empty);

    let target = fixture.directory.path().join("checkout");
    fixture.repo.checkout(&commit_hash, &target).unwrap();

    assert_eq!(std::fs::read(target.join("top.txt")).unwrap(), b"top contents");
    assert_eq!(
        std::fs::read(target.join("nested").join("inner.txt")).unwrap(),
        b"inner contents"
    );
}
