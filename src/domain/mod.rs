pub mod failure;
pub mod host_record;
pub mod inventory_store;
pub mod types;
