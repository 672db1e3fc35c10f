mod account;
mod address;

pub use account::{Account, AccountConverter, AccountEntity};
pub use address::{Address, AddressConverter, AddressEntity};
