pub mod encryptor;
pub mod keyring;

pub use encryptor::Encryptor;
