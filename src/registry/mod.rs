pub mod builder;
pub mod cache;
pub mod dispatcher;
pub mod gateway;
pub mod provider;
pub mod registry;
pub mod resolver;
#[cfg(test)]
mod tests;

pub use cache::{RegistrationCache, RegistrationEntry};
pub use gateway::{Gateway, GatewayStore, MemoryGatewayStore};
pub use provider::{ListeningPoint, SipProvider};
pub use registry::Registry;

pub const TAG_LEN: usize = 8;
pub const BRANCH_LEN: usize = 12;
pub const CNONCE_LEN: usize = 8;

pub fn random_text(count: usize) -> String {
    use rand::Rng;
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(count)
        .map(char::from)
        .collect::<String>()
}

pub fn make_tag() -> rsip::param::Tag {
    random_text(TAG_LEN).into()
}

pub fn make_via_branch() -> rsip::Param {
    rsip::Param::Branch(format!("z9hG4bK{}", random_text(BRANCH_LEN)).into())
}
