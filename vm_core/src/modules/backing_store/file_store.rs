/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    fs::{remove_file, File},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use super::{BackingStore, StoreError};
use crate::util::lock;

/// Backing store on top of a regular file
pub struct FileBackingStore {
    file: Mutex<File>,

    /// path of file, saved for deleting the file later
    path: PathBuf,

    remove_on_drop: bool,
}

impl FileBackingStore {
    /// Creates (or truncates) a file with `size` zero bytes that is removed again on drop
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> std::io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(path.as_ref())?;

        file.set_len(size)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            remove_on_drop: true,
        })
    }

    /// Opens an existing file, which is kept on drop
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::options().read(true).write(true).open(path.as_ref())?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            remove_on_drop: false,
        })
    }

    pub fn len(&self) -> std::io::Result<u64> {
        Ok(lock(&self.file).metadata()?.len())
    }

    /// Shrinks or grows the underlying file
    pub fn set_len(&self, size: u64) -> std::io::Result<()> {
        lock(&self.file).set_len(size)
    }
}

impl BackingStore for FileBackingStore {
    fn read_range(&self, offset: u64, dest: &mut [u8]) -> Result<usize, StoreError> {
        let mut file = lock(&self.file);
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < dest.len() {
            match file.read(&mut dest[total..]) {
                Ok(0) => break,
                Ok(read) => total += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(total)
    }

    fn write_range(&self, offset: u64, src: &[u8]) -> Result<(), StoreError> {
        let mut file = lock(&self.file);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(src)?;

        Ok(())
    }
}

impl Drop for FileBackingStore {
    fn drop(&mut self) {
        if self.remove_on_drop && self.path.exists() {
            let _ = remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::FileBackingStore;
    use crate::modules::backing_store::test::{
        get_test_file_path, test_backing_store_normal, test_backing_store_short_read,
        BACKING_STORE_NORMAL_TEST_SIZE,
    };

    #[test]
    fn test_file_store_normal() {
        let store = FileBackingStore::create(
            get_test_file_path("test_file_store_normal"),
            BACKING_STORE_NORMAL_TEST_SIZE as u64,
        )
        .unwrap();
        test_backing_store_normal(store);
    }

    #[test]
    fn test_file_store_short_read() {
        let store =
            FileBackingStore::create(get_test_file_path("test_file_store_short_read"), 1000)
                .unwrap();
        test_backing_store_short_read(store, 1000);
    }

    #[test]
    fn test_file_store_removed_on_drop() {
        let path = get_test_file_path("test_file_store_removed_on_drop");
        let store = FileBackingStore::create(&path, 16).unwrap();
        assert_eq!(store.len().unwrap(), 16);

        store.set_len(4).unwrap();
        assert_eq!(store.len().unwrap(), 4);

        drop(store);
        assert!(!std::path::Path::new(&path).exists());
    }
}
