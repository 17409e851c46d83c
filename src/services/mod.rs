pub mod dispatcher;
pub mod initiator;
pub mod poller;
pub mod result_store;
pub mod storage;
