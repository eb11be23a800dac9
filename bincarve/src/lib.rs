pub mod codec;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod fsys;
pub mod pool;
pub mod processor;
pub mod search;
pub mod source;

pub use codec::{Codec, Endianness};
pub use config::{InputSpec, RunConfig};
pub use coordinator::{Coordinator, RunSummary};
pub use errors::{CarveError, CarveResult};
pub use fsys::{BufferingFileSystem, FileSystemSource, LocalFileSystem};
pub use processor::{
    BytesSegment, DirectStep, Pipeline, PipelineStep, Processor, SegmentContext, SegmentIter,
    SegmentRecord, SegmentStep,
};
pub use source::{ByteSource, FileSource, MemorySource, ReadMode};
