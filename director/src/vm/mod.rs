//! VM lifecycle: factory, batch creator, deleter, and the hooks they
//! drive.

mod creator;
mod deleter;
mod factory;
mod hooks;

pub use creator::VmCreator;
pub use deleter::VmDeleter;
pub use factory::{FactoryError, VmFactory};
pub use hooks::{DiskManager, IpProvider, MetadataUpdater, NoopMetadataUpdater};
