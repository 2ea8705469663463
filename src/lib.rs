pub mod error;
pub mod header;
pub mod classify;
pub mod binary_stream;
pub mod text_stream;
pub mod walk;
pub mod archive;
pub mod logging;

pub use error::{ArchiveError, ContainerKind};
pub use header::{DeferredCount, SlotEncoding, BINARY_CONTAINER_FILE, TEXT_CONTAINER_FILE};
pub use classify::{classify_bytes, classify_file, find_control_byte, BinaryReason, Classification};
pub use binary_stream::{BinaryContainerReader, BinaryContainerWriter, BinaryEntryInfo};
pub use text_stream::{TextContainerReader, TextContainerWriter, TextEntryInfo};
pub use walk::{DirectoryWalker, ExclusionPolicy};
pub use archive::{
    list, pack, unpack, EntryKind, ListedEntry, NoopObserver, PackObserver, PackOptions,
    PackReport, UnpackOptions, UnpackReport,
};
