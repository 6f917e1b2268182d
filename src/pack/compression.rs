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

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as CompressionLevel;

/// The highest gzip compression level.
pub const MAX_LEVEL: u32 = 9;

/// Compress `data` with gzip at the given `level` in the range 0-9.
pub(super) fn compress(data: &[u8], level: u32) -> crate::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), CompressionLevel::new(level.min(MAX_LEVEL)));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress gzip `data`.
///
/// # Errors
/// - `Error::CorruptPackfile`: The data is not a valid gzip stream.
pub(super) fn decompress(data: &[u8]) -> crate::Result<Vec<u8>> {
    let mut output = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut output)
        .map_err(|_| crate::Error::CorruptPackfile("the compressed stream is invalid"))?;
    Ok(output)
}
