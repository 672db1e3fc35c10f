//! Replisync applications: the SQLite replica, configuration, and the HTTP
//! sync server shared by the `replisync` CLI and `replisync-server`.

pub mod config;
pub mod db;
pub mod server;
