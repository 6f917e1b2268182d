/*
 * Copyright 2019-2021 Wren Powell
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

use rstest::*;
use secrecy::ExposeSecret;
use spectral::prelude::*;

use bkp_store::keystore::{EncryptionKey, Keystore, KeystoreManager, DATA_KEY};
use bkp_store::remote::Remote;
use bkp_store::Error;
use common::{group_of, members, test_remote, ErrorVariantAssertions, TestRemote};

mod common;

const PASSWORD: &[u8] = b"correct horse battery staple";

fn same_key(left: &EncryptionKey, right: &EncryptionKey) -> bool {
    left.expose_secret() == right.expose_secret()
}

#[rstest]
fn published_keystore_can_be_recovered(test_remote: TestRemote) -> anyhow::Result<()> {
    let manager = KeystoreManager::default();
    let keystore = Keystore::generate();

    manager.publish(test_remote.remote.as_ref(), &keystore, PASSWORD)?;
    let recovered = manager.recover(test_remote.remote.as_ref(), PASSWORD)?;

    assert!(same_key(recovered.data_key()?, keystore.data_key()?));
    assert_that!(recovered.len()).is_equal_to(1);
    Ok(())
}

#[rstest]
fn every_key_survives_sealing() -> anyhow::Result<()> {
    let manager = KeystoreManager::default();
    let mut keystore = Keystore::generate();
    keystore.insert("archive", EncryptionKey::generate(32));

    let recovered = manager.unseal(&manager.seal(&keystore, PASSWORD)?, PASSWORD)?;

    let mut names: Vec<&str> = recovered.names().collect();
    names.sort_unstable();
    assert_that!(names).is_equal_to(vec!["archive", DATA_KEY]);
    assert!(same_key(
        recovered.get("archive").unwrap(),
        keystore.get("archive").unwrap()
    ));
    Ok(())
}

#[rstest]
fn sealing_twice_uses_a_fresh_salt() -> anyhow::Result<()> {
    let manager = KeystoreManager::default();
    let keystore = Keystore::generate();

    assert_ne!(
        manager.seal(&keystore, PASSWORD)?,
        manager.seal(&keystore, PASSWORD)?
    );
    Ok(())
}

#[rstest]
fn wrong_password_is_rejected(test_remote: TestRemote) -> anyhow::Result<()> {
    let manager = KeystoreManager::default();
    manager.publish(test_remote.remote.as_ref(), &Keystore::generate(), PASSWORD)?;

    assert_that!(manager.recover(test_remote.remote.as_ref(), b"wrong password"))
        .is_err_variant(Error::WrongPassword);
    Ok(())
}

#[rstest]
fn recovering_without_a_keystore_is_not_found(test_remote: TestRemote) {
    let manager = KeystoreManager::default();

    assert_that!(manager.recover(test_remote.remote.as_ref(), PASSWORD))
        .is_err_variant(Error::NotFound);
}

#[rstest]
fn garbage_is_not_a_keystore() {
    let manager = KeystoreManager::default();

    assert_that!(manager.unseal(b"not a keystore", PASSWORD)).is_err_variant(Error::Deserialize);
}

#[rstest]
fn group_keystore_can_be_recovered_from_any_member(
    members: (TestRemote, TestRemote, TestRemote),
) -> anyhow::Result<()> {
    let (a, b, c) = members;
    let group = group_of("group", &[&a, &b, &c]);
    let manager = KeystoreManager::default();
    let keystore = Keystore::generate();

    manager.publish(group.as_ref(), &keystore, PASSWORD)?;

    for member in [&a, &b, &c] {
        let recovered = manager.recover(member.remote.as_ref(), PASSWORD)?;
        assert!(same_key(recovered.data_key()?, keystore.data_key()?));
    }
    assert_that!(a.remote.get_keystore()?).is_equal_to(c.remote.get_keystore()?);
    Ok(())
}

#[rstest]
fn group_keystore_is_recovered_while_members_are_offline(
    members: (TestRemote, TestRemote, TestRemote),
) -> anyhow::Result<()> {
    let (a, b, c) = members;
    let group = group_of("group", &[&a, &b, &c]);
    let manager = KeystoreManager::default();
    let keystore = Keystore::generate();
    manager.publish(group.as_ref(), &keystore, PASSWORD)?;

    a.faults.go_offline();
    c.faults.go_offline();
    let recovered = manager.recover(group.as_ref(), PASSWORD)?;

    assert!(same_key(recovered.data_key()?, keystore.data_key()?));
    Ok(())
}

#[rstest]
fn keystore_is_recovered_through_a_group_after_a_missed_publish(
    members: (TestRemote, TestRemote, TestRemote),
) -> anyhow::Result<()> {
    let (a, b, c) = members;
    let manager = KeystoreManager::default();
    let keystore = Keystore::generate();

    b.faults.go_offline();
    manager.publish(group_of("group", &[&b, &a, &c]).as_ref(), &keystore, PASSWORD)?;
    b.faults.go_online();
    assert_that!(b.remote.get_keystore()).is_err_variant(Error::NotFound);

    let group = group_of("group", &[&b, &a, &c]);
    let recovered = manager.recover(group.as_ref(), PASSWORD)?;

    assert!(same_key(recovered.data_key()?, keystore.data_key()?));
    Ok(())
}
