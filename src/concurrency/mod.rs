mod lock_manager;
mod transaction;
mod wait_for;

pub use lock_manager::*;
pub use transaction::*;
pub use wait_for::*;
