pub mod capture;
pub mod connection;
pub mod error;
pub mod filter;
pub mod hostname;
pub mod interface;
pub mod packet;
pub mod port_pool;
pub mod protocol_stack;
pub mod socket;
pub mod tracker;
pub mod utils;
