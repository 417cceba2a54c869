mod account;
mod command;
mod steward;

pub use account::AccountError;
pub use command::CommandError;
pub use steward::StewardError;
