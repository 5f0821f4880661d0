mod copyup;
mod memoryfs;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use copyup::*;
pub use memoryfs::*;
