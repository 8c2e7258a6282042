// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Repository behaviour shared by every agent: claiming, projections and exception rows.

use store::{
    DatastoreExt, InException, InMessage, MessageType, Operation, OutMessage,
    OutStatus, Query, ReceptionAwareness, ReceptionStatus,
    memory::MemoryDatastore,
};

use std::{collections::HashSet, sync::Arc, thread};

fn seed_to_be_sent(datastore: &MemoryDatastore, count: usize) {
    datastore
        .transact(|repository| {
            for n in 0..count {
                let mut message =
                    OutMessage::new(format!("out-{}", n), MessageType::UserMessage);
                message.operation = Operation::ToBeSent;
                repository.insert_out_message(&mut message)?;
            }
            Ok(())
        })
        .unwrap();
}

fn claim(datastore: &MemoryDatastore) -> Vec<i64> {
    datastore
        .transact(|repository| {
            let mut batch =
                repository.find_out_messages(&Query::operation("ToBeSent").limit(3))?;
            for message in batch.iter_mut() {
                message.lock("Sending");
                repository.save(message)?;
            }
            Ok(batch.into_iter().map(|message| message.id).collect())
        })
        .unwrap()
}

#[test]
fn test_concurrent_claims_never_overlap() {
    let datastore = Arc::new(MemoryDatastore::new());
    seed_to_be_sent(&datastore, 30);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let datastore = datastore.clone();
            thread::spawn(move || {
                let mut claimed = Vec::new();
                loop {
                    let batch = claim(&datastore);
                    if batch.is_empty() {
                        break;
                    }
                    claimed.extend(batch);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "row {} claimed twice", id);
            total += 1;
        }
    }
    assert_eq!(total, 30);
}

#[test]
fn test_get_out_message_data_projection() {
    let datastore = MemoryDatastore::new();
    let id = datastore
        .transact(|repository| {
            let mut message = OutMessage::new("out-projection", MessageType::UserMessage);
            message.status = OutStatus::Sent;
            message.pmode_id = Some("pmode-a".to_owned());
            repository.insert_out_message(&mut message)
        })
        .unwrap();

    let projected = datastore
        .transact(|repository| {
            repository.get_out_message_data(id, |m| (m.status, m.pmode_id.clone()))
        })
        .unwrap();
    assert_eq!(projected, Some((OutStatus::Sent, Some("pmode-a".to_owned()))));

    let missing = datastore
        .transact(|repository| repository.get_out_message_data(id + 100, |m| m.status))
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn test_exceptions_and_reception_awareness_tables() {
    let datastore = MemoryDatastore::new();
    datastore
        .transact(|repository| {
            let mut exception = InException::new("could not parse message");
            exception.message_location = Some("memory://raw-1".to_owned());
            exception.operation = Operation::ToBeNotified;
            repository.insert_in_exception(&mut exception)?;

            let mut message = InMessage::new("in-1", MessageType::UserMessage);
            repository.insert_in_message(&mut message)?;

            let mut record = ReceptionAwareness::new(message.id, "in-1");
            record.lock("Busy");
            repository.insert_reception_awareness(&mut record)?;
            Ok(())
        })
        .unwrap();

    let exceptions: Vec<InException> = datastore
        .transact(|repository| repository.find(&Query::operation("ToBeNotified")))
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].exception, "could not parse message");

    let busy = datastore
        .transact(|repository| repository.find_reception_awareness(&Query::status("Busy")))
        .unwrap();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].status(), ReceptionStatus::Busy);
}
