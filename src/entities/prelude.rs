pub use super::history::Entity as History;
pub use super::users::Entity as Users;
