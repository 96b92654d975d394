pub mod alloc;
pub mod archive;
pub mod codec;
pub mod entry;
pub mod error;
pub mod format;
pub mod hash;
pub mod header;
pub mod layout;
pub mod pool;
pub mod store;
pub mod stream;

pub use archive::{ArcOptions, Archive, OpenMode};
pub use codec::{get_codec, Algorithm, Codec};
pub use entry::{Entry, EntryKind};
pub use error::{ArcError, Result};
pub use format::Format;
pub use layout::LayoutInfo;
pub use store::{ByteStore, MemStore};
pub use stream::{EntryReader, EntryWriter};
