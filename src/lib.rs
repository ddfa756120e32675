pub mod bitmap;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod directory;
pub mod epoch;
pub mod error;
pub mod flock;
pub mod map;
pub mod meta;
pub mod tag;
pub mod tsdb;

pub use codec::{BlockCodec, Lz4Codec};
pub use config::TsdbConfig;
pub use epoch::TimeZone;
pub use error::{status_code, Error, ErrorKind, Result};
pub use map::{DurableMap, LogMap, MemoryMap};
pub use tag::{Tag, TagOp};
pub use tsdb::{EpochOptions, StoreInfo, Tsdb};
