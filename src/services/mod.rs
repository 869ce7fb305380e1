pub mod audit;
pub mod token;

pub use audit::{AuditLogger, RequestMeta};
pub use token::{Claims, TokenService};
