// gcp/mod.rs — REST adapters for the external capabilities: archive
// store, secret vault, build executor, serverless runtime. All requests
// authenticate with a service-account token minted by `auth`.

pub mod auth;
pub mod cloudbuild;
pub mod cloudrun;
pub mod secrets;
pub mod storage;
