pub mod id;
pub mod otp;
pub mod token;

pub use id::{new_id, new_secret};
pub use otp::{generate_code, hash_code};
pub use token::{Claims, issue_token, verify_token};
