//! Client-side core of a job-matching service: session, preferences, search,
//! match scores and saved jobs, kept consistent under out-of-order responses.

pub mod api_client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod ledger;
pub mod matching;
pub mod models;
pub mod optimistic;
pub mod preferences;
pub mod search;
pub mod session;
pub mod signal;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
