pub mod compile;
pub mod diagnostics;
pub mod emit;
pub mod layout;
pub mod schema;
pub mod wire;

mod fingerprint;
