pub mod connection;
pub mod migrations;
pub mod money;
pub mod repositories;

pub use connection::{connect_with_settings, DbPool};
pub use money::{cents_to_decimal, decimal_to_cents};
