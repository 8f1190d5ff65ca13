pub(crate) mod host;

pub(crate) mod logging;

pub(crate) mod replicator;

pub(crate) mod request_handler;
