pub mod asset;
pub mod checksum;
pub mod descriptors;
pub mod job;
pub mod ledger;
pub mod rendition;
pub mod requests;

pub use asset::*;
pub use checksum::*;
pub use descriptors::*;
pub use job::*;
pub use ledger::*;
pub use rendition::*;
pub use requests::*;
