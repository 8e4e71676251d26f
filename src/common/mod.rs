pub mod addr;
pub mod error;
pub mod session;

pub use error::{Error, ErrorKind, RefKind, Result};
pub use session::{Network, Session};
