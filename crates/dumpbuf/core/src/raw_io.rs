// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Raw buffer files: the on-disk format of dumped buffers is the plain byte
// content, without header.

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tempfile::TempPath;

use crate::common::{BufferError, BufferResult};

const DUMP_PREFIX: &str = "dumpbuf-";
const DUMP_SUFFIX: &str = ".raw";

/// Write `bytes` to `path`, truncating any existing file
pub fn write_raw(bytes: &[u8], path: &Path) -> BufferResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read exactly `size` bytes from `path`. The file size must match.
pub fn read_raw(size: usize, path: &Path) -> BufferResult<Vec<u8>> {
    let mut file = File::open(path)?;
    let file_size = usize::try_from(file.metadata()?.len()).map_err(|_| BufferError::StreamSize { expected: size, read: usize::MAX })?;
    if file_size != size {
        return Err(BufferError::StreamSize { expected: size, read: file_size });
    }

    let mut buffer = vec![0u8; size];
    file.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write `bytes` to a new uniquely named file in `dir`
pub fn dump_to_temp_file(bytes: &[u8], dir: &Path) -> BufferResult<TempPath> {
    let file = tempfile::Builder::new().prefix(DUMP_PREFIX).suffix(DUMP_SUFFIX).tempfile_in(dir)?;
    let (file, path) = file.into_parts();
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(path)
}

/// Fill `buffer` from `reader`, stopping early only at end of stream
pub(crate) fn read_up_to(reader: &mut dyn Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
