mod policy;
mod randomness;
mod types;

pub use policy::*;
pub use randomness::*;
pub use types::*;
