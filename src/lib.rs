pub mod error;
pub mod handle;
mod mountinfo;
pub mod probe;
pub mod resolve;
pub mod status;

pub use error::EncodeError;
pub use error::ProbeError;
pub use error::ResolveError;
pub use error::ResourceError;
pub use handle::encode;
pub use handle::encode_at;
pub use handle::EncodeOptions;
pub use handle::FileHandle;
pub use handle::VolumeId;
pub use resolve::close;
pub use resolve::resolve;
pub use resolve::resolve_in;
pub use resolve::AccessMode;
pub use status::Status;

/// Largest payload the kernel accepts in a single `name_to_handle_at` call.
pub const MAX_HANDLE_SZ: u32 = 128;
