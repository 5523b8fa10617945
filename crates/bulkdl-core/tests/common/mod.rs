pub mod unit_server;
