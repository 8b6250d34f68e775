pub mod flush;
pub mod network;
pub mod reload;
