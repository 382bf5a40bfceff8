//! Type definitions

pub mod debtor;
pub mod distribution;
pub mod field;
pub mod import;
pub mod mapping;
pub mod messages;
pub mod progress;
pub mod user;

pub use debtor::*;
pub use distribution::*;
pub use field::*;
pub use import::*;
pub use mapping::*;
pub use messages::*;
pub use progress::*;
pub use user::*;
