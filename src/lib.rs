pub mod error;
pub mod pixel;
pub mod header;
pub mod frame;
pub mod codec;
pub mod overflow;
pub mod filename;
pub mod registry;
pub mod edf;
pub mod series;
pub mod batch;

pub use error::{ImageError, Result};
pub use pixel::{ByteOrder, DataType, Image, PixelData};
pub use header::Header;
pub use frame::{Container, ContainerInfo, Frame, MemoryContainer};
pub use codec::{get_codec, CompressionKind};
pub use registry::{FormatRegistry, ImageCodec, OpenOptions, Source};
pub use edf::{EdfFrames, EdfImage, EdfOptions, EdfWriteOptions};
pub use series::{Addressing, FileSeries, FilenameSource, SeriesOptions};
