pub mod header;
pub mod metadata;
pub mod reader;
pub mod tensor_info;
pub mod writer;

pub use header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};
pub use metadata::{GgufMetadata, GgufMetadataValue, GgufValueType};
pub use reader::GgufFile;
pub use tensor_info::GgufTensorInfo;
pub use writer::{GgufWriter, WriterState};
