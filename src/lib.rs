#![allow(dead_code)]

//! An embedded SSTable storage core: the on-disk block format, Bloom filter
//! blocks, the table builder and reader, and the comparator/iterator
//! capabilities they're built on. Does not include a WAL, memtable, version
//! set, or DB façade -- see `SPEC_FULL.md` for the drawn scope boundary.

mod block;
mod blockhandle;
mod cache;
mod cmp;
mod coding;
mod crc;
mod error;
mod file;
mod filename;
mod filter;
mod filter_block;
mod iterator;
mod options;
mod table_builder;
mod table_reader;

pub use block::{Block, BlockBuilder, BlockContents, BlockIter};
pub use blockhandle::BlockHandle;
pub use cache::{BlockCache, CacheHandle};
pub use cmp::{Cmp, DefaultCmp};
pub use error::{err, Result, Status, StatusCode};
pub use file::{MemoryFile, RandomAccessSource, TableWriter};
pub use filename::{parse_table_file_name, table_file_name};
pub use filter::{BloomPolicy, FilterPolicy, NoFilterPolicy};
pub use filter_block::{FilterBlockBuilder, FilterBlockReader};
pub use iterator::LdbIterator;
pub use options::{CompressionType, Options};
pub use table_builder::{Footer, TableBuilder, FULL_FOOTER_LENGTH, MAGIC_FOOTER_NUMBER};
pub use table_reader::{Table, TableIter};
