pub mod config;
pub mod db;
pub mod dispatch;
pub mod fanout;
pub mod model;
pub mod outbox;
pub mod payload;
pub mod push;
