pub(crate) mod clock;

pub(crate) mod keys;

pub(crate) mod kv_processor;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod network;

pub(crate) mod node;
