/*
 * Copyright 2019-2020 Wren Powell
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

use std::collections::HashSet;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use rstest::*;
use spectral::prelude::*;

use bkp_store::pack::{lookup, pack, shared_prefix_len, unpack, PackEntry, Packfile, MAGIC};
use bkp_store::{Error, ObjectId};
use common::{buffers, ErrorVariantAssertions};

mod common;

/// Return an ID whose first bytes are `prefix`, followed by `fill`.
fn id_with(prefix: &[u8], fill: u8) -> ObjectId {
    let mut bytes = [fill; 32];
    bytes[..prefix.len()].copy_from_slice(prefix);
    ObjectId::from_bytes(bytes)
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn entries_sharing_a_prefix_unpack_sorted() -> anyhow::Result<()> {
    let first = id_with(&[0x00, 0xaa], 0xaa);
    let second = id_with(&[0x00, 0xbb], 0xbb);
    let entries = vec![
        PackEntry {
            id: second,
            data: b"second".to_vec(),
        },
        PackEntry {
            id: first,
            data: b"first".to_vec(),
        },
    ];

    let unpacked = unpack(&pack(entries, 1, 6)?)?;

    assert_that!(unpacked.len()).is_equal_to(2);
    assert_that!(unpacked[0].id).is_equal_to(first);
    assert_that!(unpacked[0].data.as_slice()).is_equal_to(&b"first"[..]);
    assert_that!(unpacked[1].id).is_equal_to(second);
    assert_that!(unpacked[1].data.as_slice()).is_equal_to(&b"second"[..]);
    Ok(())
}

#[rstest]
fn unpack_returns_the_packed_set(buffers: Vec<Vec<u8>>) -> anyhow::Result<()> {
    let entries: Vec<PackEntry> = buffers.into_iter().map(PackEntry::new).collect();
    let expected: HashSet<PackEntry> = entries.iter().cloned().collect();

    let unpacked = unpack(&pack(entries, 0, 6)?)?;

    assert_that!(unpacked.iter().cloned().collect::<HashSet<_>>()).is_equal_to(expected);
    assert!(unpacked.windows(2).all(|pair| pair[0].id < pair[1].id));
    Ok(())
}

#[rstest]
fn lookup_finds_every_entry(buffers: Vec<Vec<u8>>) -> anyhow::Result<()> {
    let entries: Vec<PackEntry> = buffers.into_iter().map(PackEntry::new).collect();
    let packfile = Packfile::decode(&Packfile::new(0, entries.clone())?.encode(9)?)?;

    for entry in &entries {
        assert_that!(lookup(&packfile, &entry.id)?).is_equal_to(entry.data.as_slice());
    }
    assert_that!(lookup(&packfile, &ObjectId::of(b"absent"))).is_err_variant(Error::NotFound);
    Ok(())
}

#[test]
fn duplicate_entries_are_collapsed() -> anyhow::Result<()> {
    let entry = PackEntry::new(b"data".to_vec());
    let packfile = Packfile::new(32, vec![entry.clone(), entry.clone()])?;

    assert_that!(packfile.len()).is_equal_to(1);
    assert_that!(packfile.prefix()).is_equal_to(&entry.id.as_bytes()[..]);
    assert_that!(unpack(&packfile.encode(1)?)?).is_equal_to(vec![entry]);
    Ok(())
}

#[test]
fn mismatched_prefixes_are_rejected() {
    let entries = vec![
        PackEntry {
            id: id_with(&[0x01], 0),
            data: Vec::new(),
        },
        PackEntry {
            id: id_with(&[0x02], 0),
            data: Vec::new(),
        },
    ];

    assert_that!(Packfile::new(1, entries.clone())).is_err_variant(Error::InvalidPackPrefix);
    assert_that!(Packfile::new(33, entries.clone())).is_err_variant(Error::InvalidPackPrefix);
    assert_that!(Packfile::new(0, entries)).is_ok();
}

#[test]
fn empty_packfile_needs_an_empty_prefix() -> anyhow::Result<()> {
    assert_that!(Packfile::new(1, Vec::new())).is_err_variant(Error::InvalidPackPrefix);
    assert!(unpack(&pack(Vec::new(), 0, 6)?)?.is_empty());
    Ok(())
}

#[test]
fn wrong_magic_is_corrupt() {
    let mut raw = b"KCAP".to_vec();
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.push(0);

    assert_that!(Packfile::decode(&gzip(&raw))).is_err_variant(Error::CorruptPackfile(""));
}

#[test]
fn data_which_is_not_gzip_is_corrupt() {
    assert_that!(Packfile::decode(b"not a packfile")).is_err_variant(Error::CorruptPackfile(""));
}

#[test]
fn count_mismatch_is_corrupt() {
    let body = b"body";
    let mut raw = MAGIC.to_vec();
    raw.extend_from_slice(&2u32.to_le_bytes());
    raw.push(0);
    raw.extend_from_slice(ObjectId::of(body).as_bytes());
    raw.extend_from_slice(&(body.len() as u32).to_le_bytes());
    raw.extend_from_slice(body);

    assert_that!(Packfile::decode(&gzip(&raw))).is_err_variant(Error::CorruptPackfile(""));
}

#[test]
fn out_of_order_entries_are_corrupt() {
    let mut raw = MAGIC.to_vec();
    raw.extend_from_slice(&2u32.to_le_bytes());
    raw.push(0);
    for fill in [0xbb, 0xaa] {
        raw.extend_from_slice(&[fill; 32]);
        raw.extend_from_slice(&0u32.to_le_bytes());
    }

    assert_that!(Packfile::decode(&gzip(&raw))).is_err_variant(Error::CorruptPackfile(""));
}

#[test]
fn shared_prefix_len_counts_common_bytes() {
    let ids = [
        id_with(&[0x00, 0xaa, 0x01], 0),
        id_with(&[0x00, 0xaa, 0x02], 0),
        id_with(&[0x00, 0xaa, 0x03], 0),
    ];
    assert_that!(shared_prefix_len(&ids)).is_equal_to(2);
    assert_that!(shared_prefix_len(&ids[..1])).is_equal_to(32);
}
