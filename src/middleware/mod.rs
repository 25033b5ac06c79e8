pub mod identity;
pub mod validation;

pub use identity::CurrentUser;
pub use validation::ValidatedJson;
