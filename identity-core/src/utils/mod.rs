pub mod password;

pub use password::{Password, PasswordHashString, hash_password, verify_dummy, verify_password};
