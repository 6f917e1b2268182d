/*
 * Copyright 2019-2021 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fmt::{Debug, Formatter};

use cdchunking::{ChunkerImpl, ZPAQ};
use serde::{Deserialize, Serialize};

/// A method for splitting file contents into chunks.
///
/// Chunks are the unit of deduplication: two files which share a chunk store it once. The chunk
/// size trades deduplication against the number of objects to track.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum Chunking {
    /// Split data into fixed-size chunks.
    ///
    /// An insertion near the start of a file shifts every later chunk boundary, so this
    /// deduplicates edited files poorly.
    Fixed {
        /// The size of each chunk in bytes.
        size: u32,
    },

    /// Split data using the ZPAQ content-defined chunking algorithm.
    ///
    /// Boundaries depend on the content around them, so an edit only changes the chunks near it.
    Zpaq {
        /// The average chunk size, which is 2^`bits` bytes.
        bits: u32,
    },
}

impl Default for Chunking {
    fn default() -> Self {
        Self::ZPAQ
    }
}

impl Chunking {
    /// A reasonable default value of `Chunking::Zpaq`.
    pub const ZPAQ: Self = Self::Zpaq { bits: 18 };

    /// Check that the parameters of this method are usable.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        match self {
            Chunking::Fixed { size } if *size == 0 => Err(crate::Error::Config(
                "the fixed chunk size must be positive".into(),
            )),
            Chunking::Zpaq { bits } if !(1..=31).contains(bits) => Err(crate::Error::Config(
                "the ZPAQ chunk bits must be between 1 and 31".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Return a chunker for this chunking method.
    pub(crate) fn to_chunker(&self) -> IncrementalChunker {
        let chunker: Box<dyn ChunkerImpl + Send + Sync> = match self {
            Chunking::Fixed { size } => Box::new(FixedChunker::new(*size as usize)),
            Chunking::Zpaq { bits } => Box::new(ZPAQ::new(*bits as usize)),
        };
        IncrementalChunker::new(chunker)
    }

    /// Split `data` into chunks.
    pub fn chunk(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut chunker = self.to_chunker();
        chunker.push(data);
        chunker.finish();
        chunker.chunks()
    }
}

/// A `ChunkerImpl` which chunks data into fixed-size chunks.
struct FixedChunker {
    chunk_size: usize,
    bytes_read: usize,
}

impl FixedChunker {
    fn new(chunk_size: usize) -> Self {
        FixedChunker {
            chunk_size,
            bytes_read: 0,
        }
    }
}

impl ChunkerImpl for FixedChunker {
    fn find_boundary(&mut self, data: &[u8]) -> Option<usize> {
        let result = if self.bytes_read + data.len() < self.chunk_size {
            None
        } else {
            Some(self.chunk_size - self.bytes_read)
        };
        self.bytes_read += data.len();
        result
    }

    fn reset(&mut self) {
        self.bytes_read = 0;
    }
}

/// A chunker which partitions data pushed to it into chunks.
pub(crate) struct IncrementalChunker {
    chunker: Box<dyn ChunkerImpl + Send + Sync>,
    buffer: Vec<u8>,
    chunks: Vec<Vec<u8>>,
}

impl Debug for IncrementalChunker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalChunker")
            .field("buffered", &self.buffer.len())
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

impl IncrementalChunker {
    /// Return a new instance which uses the given `chunker` to determine chunk boundaries.
    fn new(chunker: Box<dyn ChunkerImpl + Send + Sync>) -> Self {
        Self {
            chunker,
            buffer: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Feed `data` to the chunker.
    pub fn push(&mut self, data: &[u8]) {
        let mut unchunked_data = data;

        loop {
            match self.chunker.find_boundary(unchunked_data) {
                None => {
                    self.buffer.extend_from_slice(unchunked_data);
                    return;
                }
                Some(index) => {
                    self.buffer.extend_from_slice(&unchunked_data[..index]);
                    let new_chunk = std::mem::take(&mut self.buffer);
                    self.chunks.push(new_chunk);
                    unchunked_data = &unchunked_data[index..];
                    self.chunker.reset();
                }
            }
        }
    }

    /// Emit any buffered data as a final chunk.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let new_chunk = std::mem::take(&mut self.buffer);
            self.chunks.push(new_chunk);
        }
        self.chunker.reset();
    }

    /// Return the complete chunks produced so far.
    ///
    /// Some data may still be buffered internally until `finish` is called.
    pub fn chunks(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.chunks)
    }
}
