//! CSV-to-binary conversion, mmap-backed channel files, the multi-channel
//! concat dataset, and the dataloader that stacks samples into batches
//! (spec §3 "Data model", §4.5 "Binarization", §4.6 "Concat dataset", §5
//! "Dataloader").

pub mod binarize;
pub mod concat;
pub mod dataloader;
pub mod mmap_file;
pub mod sampler;
pub mod schema;

pub use binarize::binarize_csv;
pub use concat::{resolve_channels, Channel, ConcatDataset, Sample};
pub use dataloader::{Batch, DataLoader, DataLoaderOptions};
pub use mmap_file::{validate_pair, MmapRecordFile};
pub use sampler::{RandomSampler, Sampler, SequentialSampler};
pub use schema::RecordSchema;
