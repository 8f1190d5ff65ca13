/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of a [node](crate::node::Node).

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::types::data_types::NodeId;

/// Stores the user-defined parameters required to start a node, that is:
/// 1. The node's [keypair](ed25519_dalek::SigningKey), which signs the history roots it emits.
/// 2. The node's [`NodeId`].
/// 3. The snapshot interval: a snapshot is taken at a committed version once it is more than this many
///    versions past the last snapshot.
/// 4. The number of worker threads that snapshots are generated on. With zero workers, snapshots are
///    generated inline, on the thread that commits.
/// 5. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// The ledger core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.node_id(...)`
    - `.snapshot_interval(...)`
    - `.log_events(...)`

    Optional:
    - `.worker_threads(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the node's keypair, used to sign history roots. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the node's identifier in the cluster. Required."))]
    pub node_id: NodeId,
    #[builder(setter(doc = "Set the number of committed versions between snapshots. Required."))]
    pub snapshot_interval: u64,
    #[builder(
        default = 1,
        setter(doc = "Set the number of snapshot worker threads. Optional, defaults to 1.")
    )]
    pub worker_threads: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}
