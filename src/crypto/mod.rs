// Credential and signature helpers.
pub mod hash;
pub mod jwt;
pub mod password;
pub mod signature;
