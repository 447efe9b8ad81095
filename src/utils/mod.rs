pub mod crypto;
pub mod proof_token;
pub mod time;
