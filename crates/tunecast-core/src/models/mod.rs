pub mod activity;
pub mod owner;
pub mod podcast;
pub mod record;

pub use activity::*;
pub use owner::*;
pub use podcast::*;
pub use record::*;
