#![forbid(unsafe_code)]

pub mod credentials;

pub use credentials::{
    BearerToken, CredentialError, CredentialProvider, FileCredentials, InMemoryCredentials,
};
