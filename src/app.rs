/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The request handler that a [node](crate::node::Node) executes requests with.
//!
//! Request payloads are Borsh-serialized [`KvRequest`]s. A `KvRequest::Write` is applied to the store
//! as a single transaction. A `KvRequest::EmitSignature` commits a signature record over the current
//! history root: since it travels through consensus like any other request, signatures are globally
//! committed in order with the writes they cover.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::consensus::strategy::{RequestError, RequestHandler};
use crate::events::{EmitSignatureEvent, Event};
use crate::store::{Store, Write};
use crate::types::data_types::{Version, ViewNumber};
use crate::types::requests::Request;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum KvRequest {
    /// Apply every write in one transaction.
    Write(Vec<Write>),

    /// Sign the current history root in `view`.
    EmitSignature { view: ViewNumber },
}

impl KvRequest {
    pub fn into_request(self) -> Request {
        Request::new(self.try_to_vec().unwrap())
    }
}

pub struct StoreRequestHandler {
    store: Store,
    event_publisher: Option<Sender<Event>>,
}

impl StoreRequestHandler {
    pub fn new(store: Store, event_publisher: Option<Sender<Event>>) -> Self {
        Self {
            store,
            event_publisher,
        }
    }
}

impl RequestHandler for StoreRequestHandler {
    fn receive_request(&mut self, request: Request) -> Result<Version, RequestError> {
        let kv_request = KvRequest::try_from_slice(&request.payload)
            .map_err(|err| RequestError(format!("malformed request: {}", err)))?;

        match kv_request {
            KvRequest::Write(writes) => {
                if writes.is_empty() {
                    return Err(RequestError(String::from("request contains no writes")));
                }
                let mut tx = self.store.begin();
                for Write { map, key, value } in writes {
                    match value {
                        Some(value) => tx.put(&map, &key, &value),
                        None => tx.remove(&map, &key),
                    }
                }
                tx.commit().map_err(|err| RequestError(err.to_string()))
            }
            KvRequest::EmitSignature { view } => {
                let record = self
                    .store
                    .emit_signature(view)
                    .map_err(|err| RequestError(err.to_string()))?;

                Event::publish(
                    &self.event_publisher,
                    Event::EmitSignature(EmitSignatureEvent {
                        timestamp: SystemTime::now(),
                        version: record.version,
                        root: record.root,
                    }),
                );
                Ok(record.version)
            }
        }
    }
}
