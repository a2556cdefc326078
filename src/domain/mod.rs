pub mod audit;
pub mod bank;
pub mod fees;
pub mod ledger;
pub mod money;
pub mod phone;
pub mod pin;
pub mod ports;
pub mod session;
