pub mod prelude;

pub mod history;
pub mod users;
